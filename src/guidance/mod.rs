//! The guidance layer: phase state machine for ascent, closed loops for
//! circularization and apsis evening, the SOI-intercept planner and the
//! concurrent auto-stage monitor.

mod ascent;
mod auto_stage;
mod circularize;
mod delta_v;
mod error;
mod evening;
mod phase;
mod transfer;
#[cfg(test)]
mod tests;

pub use ascent::{AscentConfig, AscentController, AscentReport, gravity_turn_pitch};
pub use auto_stage::{AutoStageMonitor, StagingGuard};
pub use circularize::{CircularizationController, CircularizeConfig, shaped_pitch, shaped_throttle};
pub use delta_v::{DeltaVBudget, SURFACE_GRAVITY, estimate};
pub use error::GuidanceError;
pub use evening::{Apsis, EveningConfig, OrbitEvening, apses_even};
pub use phase::GuidancePhase;
pub use transfer::{PlannedTransfer, TransferConfig, TransferPlanner};
