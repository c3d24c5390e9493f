use crate::telemetry::TelemetryChannel;
use std::time::Duration;
use thiserror::Error;

/// Failures of the guidance layer. Planning failures are fatal to the
/// current mission phase; actuation commands are never retried since the
/// tick loops re-issue desired state anyway.
#[derive(Debug, Error)]
pub enum GuidanceError {
    #[error("no transfer target configured")]
    NoTransferTarget,
    #[error("delta-v for stage {stage} is not finite (mass ratio {ratio})")]
    Computation { stage: usize, ratio: f64 },
    #[error("no intercept found after {steps} search steps")]
    NoIntercept { steps: u32 },
    #[error("timed out after {timeout:?} waiting on {channel}")]
    WaitTimeout {
        channel: TelemetryChannel,
        timeout: Duration,
    },
    #[error("apsis evening did not converge within {steps} adjustment steps")]
    NoConvergence { steps: u32 },
}
