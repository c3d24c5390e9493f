use crate::telemetry::{TelemetryChannel, TelemetrySource};
use crate::vehicle::{Setpoint, SetpointCache, VehicleCommander};
use crate::log;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CircularizeConfig {
    /// Seconds-to-apoapsis window inside which the burn runs.
    pub min_window: f64,
    pub max_window: f64,
    /// Throttle held once closer to apoapsis than the window minimum, to
    /// avoid overshoot.
    pub throttle_floor: f64,
    /// Fraction of apoapsis the periapsis must reach before release.
    pub closure: f64,
    /// Half-width of the pitch shaping band around horizontal.
    pub pitch_bias: f64,
    pub heading: f64,
    pub tick: Duration,
}

impl Default for CircularizeConfig {
    fn default() -> Self {
        Self {
            min_window: 15.0,
            max_window: 30.0,
            throttle_floor: 0.05,
            closure: 0.99,
            pitch_bias: 10.0,
            heading: 90.0,
            tick: Duration::from_millis(100),
        }
    }
}

fn window_fraction(cfg: &CircularizeConfig, time_to_apoapsis: f64) -> f64 {
    (1.0 - (time_to_apoapsis - cfg.min_window) / (cfg.max_window - cfg.min_window)).clamp(0.0, 1.0)
}

/// Proportional throttle over the seconds-to-apoapsis window. Zero before
/// the window opens, at the floor once inside the minimum lead, always
/// within [0, 1].
pub fn shaped_throttle(cfg: &CircularizeConfig, time_to_apoapsis: f64) -> f64 {
    if !time_to_apoapsis.is_finite() {
        return 0.0;
    }
    if time_to_apoapsis < cfg.min_window {
        return cfg.throttle_floor;
    }
    window_fraction(cfg, time_to_apoapsis)
}

/// Pitch shaping symmetric around horizontal: slightly retrograde of level
/// when the burn starts, slightly prograde when apoapsis is close.
pub fn shaped_pitch(cfg: &CircularizeConfig, time_to_apoapsis: f64) -> f64 {
    if !time_to_apoapsis.is_finite() {
        return 0.0;
    }
    -cfg.pitch_bias + window_fraction(cfg, time_to_apoapsis) * 2.0 * cfg.pitch_bias
}

/// Closes the periapsis-vs-apoapsis loop near apoapsis until the orbit is
/// circular within the configured tolerance. Proportional only; steady-state
/// error is accepted and bounded by the closure fraction.
pub struct CircularizationController {
    tlm: Arc<dyn TelemetrySource>,
    cmd: Arc<dyn VehicleCommander>,
    cfg: CircularizeConfig,
    helm: SetpointCache,
}

impl CircularizationController {
    pub fn new(
        tlm: Arc<dyn TelemetrySource>,
        cmd: Arc<dyn VehicleCommander>,
        cfg: CircularizeConfig,
    ) -> Self {
        Self {
            tlm,
            cmd,
            cfg,
            helm: SetpointCache::default(),
        }
    }

    pub async fn run(&mut self) {
        loop {
            let apoapsis = self.tlm.read(TelemetryChannel::ApoapsisAltitude);
            let periapsis = self.tlm.read(TelemetryChannel::PeriapsisAltitude);
            if periapsis >= self.cfg.closure * apoapsis {
                log!("At target periapsis: {periapsis:.0}m");
                break;
            }
            let tta = self.tlm.read(TelemetryChannel::TimeToApoapsis);
            self.helm
                .apply(
                    self.cmd.as_ref(),
                    Setpoint {
                        throttle: shaped_throttle(&self.cfg, tta),
                        pitch: shaped_pitch(&self.cfg, tta),
                        heading: self.cfg.heading,
                    },
                )
                .await;
            tokio::time::sleep(self.cfg.tick).await;
        }
        self.cmd.set_throttle(0.0).await;
        self.cmd.set_rcs(false).await;
        self.cmd.set_sas(None).await;
    }
}
