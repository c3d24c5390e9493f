mod commander;
pub(crate) mod sim;
mod stage;

pub use commander::{NodeHandle, NodeProjection, SasMode, Setpoint, SetpointCache, VehicleCommander};
pub use stage::{EnginePart, IspMode, StageGroup, StagePlan};
