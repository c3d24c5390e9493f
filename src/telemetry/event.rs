use std::time::Duration;
use strum_macros::Display;
use tokio::sync::watch;
use tokio::time::Instant;

/// Comparison direction of a threshold predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Comparison {
    LessThan,
    GreaterThan,
}

impl Comparison {
    pub fn holds(self, value: f64, bound: f64) -> bool {
        match self {
            Comparison::LessThan => value < bound,
            Comparison::GreaterThan => value > bound,
        }
    }
}

/// Distinct outcomes of a threshold wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum WaitOutcome {
    Woken,
    TimedOut,
}

/// Parks on the subscription until the predicate transitions to true or the
/// deadline passes. A hung-up feed counts as a timeout, never as a wake-up.
pub async fn wait_threshold(
    mut rx: watch::Receiver<f64>,
    cmp: Comparison,
    bound: f64,
    timeout: Duration,
) -> WaitOutcome {
    if cmp.holds(*rx.borrow_and_update(), bound) {
        return WaitOutcome::Woken;
    }
    let deadline = Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, rx.changed()).await {
            Err(_) | Ok(Err(_)) => return WaitOutcome::TimedOut,
            Ok(Ok(())) => {
                if cmp.holds(*rx.borrow_and_update(), bound) {
                    return WaitOutcome::Woken;
                }
            }
        }
    }
}
