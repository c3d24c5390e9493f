use async_trait::async_trait;
use strum_macros::Display;

/// Opaque handle to a scheduled maneuver node owned by the actuation side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SasMode {
    Stability,
    Maneuver,
    Prograde,
    Retrograde,
}

/// Orbit projected from a maneuver node. `time_to_soi_change` is NaN while
/// the projected orbit never leaves the current sphere of influence.
#[derive(Debug, Clone, Copy)]
pub struct NodeProjection {
    pub apoapsis: f64,
    pub periapsis: f64,
    pub time_to_soi_change: f64,
}

impl NodeProjection {
    pub fn has_intercept(&self) -> bool { self.time_to_soi_change.is_finite() }
}

/// Write-side boundary towards the external vehicle simulation. All commands
/// are fire-and-forget and safe to re-issue with the same value.
#[async_trait]
pub trait VehicleCommander: Send + Sync {
    async fn set_throttle(&self, throttle: f64);
    async fn set_target_pitch(&self, pitch: f64);
    async fn set_target_heading(&self, heading: f64);
    async fn set_rcs(&self, enabled: bool);
    async fn set_sas(&self, mode: Option<SasMode>);
    async fn activate_next_stage(&self);
    async fn add_node(&self, ut: f64, prograde: f64) -> NodeHandle;
    async fn set_node_time(&self, node: NodeHandle, ut: f64);
    async fn set_node_prograde(&self, node: NodeHandle, prograde: f64);
    async fn remove_node(&self, node: NodeHandle);
    fn node_projection(&self, node: NodeHandle) -> NodeProjection;
    fn node_remaining_dv(&self, node: NodeHandle) -> f64;
    fn universal_time(&self) -> f64;
}

/// Desired throttle/attitude state for one control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub throttle: f64,
    pub pitch: f64,
    pub heading: f64,
}

/// Applies setpoints through the commander, skipping values already on the
/// wire. Makes idempotent re-issue from tick loops structural.
#[derive(Debug, Default)]
pub struct SetpointCache {
    last: Option<Setpoint>,
}

impl SetpointCache {
    #[allow(clippy::float_cmp)]
    pub async fn apply(&mut self, cmd: &dyn VehicleCommander, next: Setpoint) {
        match self.last {
            Some(prev) if prev == next => {}
            Some(prev) => {
                if prev.throttle != next.throttle {
                    cmd.set_throttle(next.throttle).await;
                }
                if prev.pitch != next.pitch {
                    cmd.set_target_pitch(next.pitch).await;
                }
                if prev.heading != next.heading {
                    cmd.set_target_heading(next.heading).await;
                }
                self.last = Some(next);
            }
            None => {
                cmd.set_throttle(next.throttle).await;
                cmd.set_target_pitch(next.pitch).await;
                cmd.set_target_heading(next.heading).await;
                self.last = Some(next);
            }
        }
    }
}
