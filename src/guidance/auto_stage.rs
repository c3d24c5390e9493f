use crate::telemetry::TelemetrySource;
use crate::vehicle::VehicleCommander;
use crate::{event, info};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Sole path to `activate_next_stage` during an ascent run. Latches each
/// stage index so concurrent callers (guidance loop and monitor) get the
/// at-most-once-per-stage guarantee structurally.
pub struct StagingGuard {
    cmd: Arc<dyn VehicleCommander>,
    fired: Mutex<HashSet<i32>>,
}

impl StagingGuard {
    pub fn new(cmd: Arc<dyn VehicleCommander>) -> Self {
        Self {
            cmd,
            fired: Mutex::new(HashSet::new()),
        }
    }

    /// Activates the next stage if this stage index has not fired yet.
    /// Returns whether the activation happened now.
    pub async fn separate(&self, stage: i32) -> bool {
        let mut fired = self.fired.lock().await;
        if fired.insert(stage) {
            self.cmd.activate_next_stage().await;
            info!("Stage {stage} separated");
            true
        } else {
            event!("Separation of stage {stage} already latched");
            false
        }
    }
}

/// Background task that advances staging whenever the active stage runs out
/// of usable propellant. Decouple-only stages advance immediately.
pub struct AutoStageMonitor {
    tlm: Arc<dyn TelemetrySource>,
    guard: Arc<StagingGuard>,
    fuel_epsilon: f64,
    token: CancellationToken,
}

impl AutoStageMonitor {
    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Spawns the monitor loop. The returned token requests shutdown; the
    /// monitor observes it within one polling tick.
    pub fn spawn(
        tlm: Arc<dyn TelemetrySource>,
        guard: Arc<StagingGuard>,
        fuel_epsilon: f64,
    ) -> (JoinHandle<()>, CancellationToken) {
        let token = CancellationToken::new();
        let monitor = Self {
            tlm,
            guard,
            fuel_epsilon,
            token: token.clone(),
        };
        let handle = tokio::spawn(async move { monitor.run().await });
        (handle, token)
    }

    async fn run(&self) {
        while !self.token.is_cancelled() {
            // The active stage sits one below the reported index.
            let active = self.tlm.current_stage() - 1;
            if active < 0 {
                return;
            }
            match self.tlm.stage_propellants(active).first() {
                None => {
                    // Decouple-only stage, nothing to wait for.
                    self.guard.separate(active).await;
                }
                Some(&propellant) => {
                    event!("Auto-stage watching {propellant} in stage {active}");
                    loop {
                        if self.token.is_cancelled() {
                            return;
                        }
                        if self.tlm.stage_fuel(active, propellant) <= self.fuel_epsilon {
                            self.guard.separate(active).await;
                            break;
                        }
                        tokio::select! {
                            () = self.token.cancelled() => return,
                            () = tokio::time::sleep(Self::POLL_INTERVAL) => {}
                        }
                    }
                }
            }
            tokio::select! {
                () = self.token.cancelled() => return,
                () = tokio::time::sleep(Self::POLL_INTERVAL) => {}
            }
        }
    }
}
