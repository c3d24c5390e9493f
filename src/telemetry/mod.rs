//! Read-side boundary towards the external vehicle simulation: live scalar
//! channels plus the threshold-wait primitive every controller parks on.

mod event;

pub use event::{Comparison, WaitOutcome, wait_threshold};

use async_trait::async_trait;
use std::time::Duration;
use strum_macros::{Display, EnumIter};
use tokio::sync::watch;

/// Propellant types the staging logic knows how to monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Propellant {
    SolidFuel,
    LiquidFuel,
    Oxidizer,
    MonoPropellant,
}

/// One continuously-updated scalar of the vehicle state. `Fuel` channels carry
/// the vessel-wide total for that propellant type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum TelemetryChannel {
    Altitude,
    ApoapsisAltitude,
    PeriapsisAltitude,
    TimeToApoapsis,
    TimeToPeriapsis,
    TimeToSoiChange,
    TimeToManeuver,
    Fuel(Propellant),
}

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Non-blocking read of the latest value on a channel.
    fn read(&self, channel: TelemetryChannel) -> f64;

    /// Live-updating subscription to a channel.
    fn subscribe(&self, channel: TelemetryChannel) -> watch::Receiver<f64>;

    /// Stage index the vehicle currently reports.
    fn current_stage(&self) -> i32;

    /// Monitorable propellant types carried by one stage, non-cumulative.
    fn stage_propellants(&self, stage: i32) -> Vec<Propellant>;

    /// Remaining quantity of one propellant type within one stage.
    fn stage_fuel(&self, stage: i32, propellant: Propellant) -> f64;

    /// Parks the caller until `channel <cmp> bound` holds or the timeout
    /// expires. Consumes no CPU while parked.
    async fn await_threshold(
        &self,
        channel: TelemetryChannel,
        cmp: Comparison,
        bound: f64,
        timeout: Duration,
    ) -> WaitOutcome {
        event::wait_threshold(self.subscribe(channel), cmp, bound, timeout).await
    }
}
