use super::auto_stage::{AutoStageMonitor, StagingGuard};
use super::circularize::{CircularizationController, CircularizeConfig};
use super::error::GuidanceError;
use super::phase::GuidancePhase;
use crate::telemetry::{Comparison, Propellant, TelemetryChannel, TelemetrySource, WaitOutcome};
use crate::vehicle::{SasMode, Setpoint, SetpointCache, VehicleCommander};
use crate::{info, log};
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AscentConfig {
    /// Target apoapsis and periapsis altitude.
    pub target_altitude: f64,
    pub heading: f64,
    pub countdown_hold: Duration,
    /// Altitude band of the gravity turn; the lower bound doubles as the
    /// threshold that ends the vertical climb.
    pub turn_start_altitude: f64,
    pub turn_end_altitude: f64,
    pub turn_start_pitch: f64,
    pub turn_end_pitch: f64,
    /// Fraction of the target apoapsis at which the vehicle stops burning at
    /// full throttle and coasts the rest of the way up.
    pub coast_apoapsis_fraction: f64,
    pub coast_throttle: f64,
    pub fuel_epsilon: f64,
    pub tick: Duration,
    pub climb_timeout: Duration,
}

impl Default for AscentConfig {
    fn default() -> Self {
        Self {
            target_altitude: 80_000.0,
            heading: 90.0,
            countdown_hold: Duration::from_secs(1),
            turn_start_altitude: 3_000.0,
            turn_end_altitude: 45_000.0,
            turn_start_pitch: 90.0,
            turn_end_pitch: 45.0,
            coast_apoapsis_fraction: 0.9,
            coast_throttle: 0.25,
            fuel_epsilon: 0.1,
            tick: Duration::from_millis(100),
            climb_timeout: Duration::from_secs(120),
        }
    }
}

/// Gravity-turn pitch at a given altitude: linear between the start and end
/// pitch over the configured band, clamped outside of it.
pub fn gravity_turn_pitch(cfg: &AscentConfig, altitude: f64) -> f64 {
    let span = cfg.turn_end_altitude - cfg.turn_start_altitude;
    let frac = ((altitude - cfg.turn_start_altitude) / span).clamp(0.0, 1.0);
    cfg.turn_start_pitch + (cfg.turn_end_pitch - cfg.turn_start_pitch) * frac
}

#[derive(Debug, Clone)]
pub struct AscentReport {
    pub apoapsis: f64,
    pub periapsis: f64,
    pub elapsed: TimeDelta,
}

/// Flies a staged vehicle from the pad to a circularized orbit at the target
/// altitude. Staging runs concurrently through the auto-stage monitor; both
/// it and this controller go through the same [`StagingGuard`].
pub struct AscentController {
    tlm: Arc<dyn TelemetrySource>,
    cmd: Arc<dyn VehicleCommander>,
    cfg: AscentConfig,
    phase: GuidancePhase,
    helm: SetpointCache,
}

impl AscentController {
    pub fn new(
        tlm: Arc<dyn TelemetrySource>,
        cmd: Arc<dyn VehicleCommander>,
        cfg: AscentConfig,
    ) -> Self {
        Self {
            tlm,
            cmd,
            cfg,
            phase: GuidancePhase::Countdown,
            helm: SetpointCache::default(),
        }
    }

    pub fn phase(&self) -> GuidancePhase { self.phase }

    fn advance(&mut self) {
        if let Some(next) = self.phase.next() {
            info!("Guidance phase: {} -> {next}", self.phase);
            self.phase = next;
        }
    }

    pub async fn fly(&mut self) -> Result<AscentReport, GuidanceError> {
        let start = Utc::now();
        let guard = Arc::new(StagingGuard::new(Arc::clone(&self.cmd)));

        // Countdown: point straight up, throttle up, hold.
        self.cmd.set_sas(Some(SasMode::Stability)).await;
        self.helm
            .apply(
                self.cmd.as_ref(),
                Setpoint {
                    throttle: 1.0,
                    pitch: self.cfg.turn_start_pitch,
                    heading: self.cfg.heading,
                },
            )
            .await;
        tokio::time::sleep(self.cfg.countdown_hold).await;
        self.advance();

        let launch_stage = self.tlm.current_stage();
        guard.separate(launch_stage).await;
        info!("Liftoff, heading {:.0}", self.cfg.heading);
        let (monitor, monitor_token) = AutoStageMonitor::spawn(
            Arc::clone(&self.tlm),
            Arc::clone(&guard),
            self.cfg.fuel_epsilon,
        );

        // Vertical climb until the gravity turn band starts.
        let woken = self
            .tlm
            .await_threshold(
                TelemetryChannel::Altitude,
                Comparison::GreaterThan,
                self.cfg.turn_start_altitude,
                self.cfg.climb_timeout,
            )
            .await;
        if woken == WaitOutcome::TimedOut {
            monitor_token.cancel();
            return Err(GuidanceError::WaitTimeout {
                channel: TelemetryChannel::Altitude,
                timeout: self.cfg.climb_timeout,
            });
        }
        self.advance();

        let coast_apoapsis = self.cfg.coast_apoapsis_fraction * self.cfg.target_altitude;
        loop {
            let apoapsis = self.tlm.read(TelemetryChannel::ApoapsisAltitude);
            if apoapsis >= coast_apoapsis {
                // Boosters still holding solid fuel at this point only slow
                // the coast down; cut them loose early. The guard keeps this
                // idempotent with the monitor's own fuel trigger.
                let active = self.tlm.current_stage() - 1;
                if self.tlm.stage_fuel(active, Propellant::SolidFuel) > self.cfg.fuel_epsilon
                    && guard.separate(active).await
                {
                    log!("Forced early booster separation at {apoapsis:.0}m apoapsis");
                }
                break;
            }
            let pitch = gravity_turn_pitch(&self.cfg, self.tlm.read(TelemetryChannel::Altitude));
            self.helm
                .apply(
                    self.cmd.as_ref(),
                    Setpoint {
                        throttle: 1.0,
                        pitch,
                        heading: self.cfg.heading,
                    },
                )
                .await;
            tokio::time::sleep(self.cfg.tick).await;
        }
        self.advance();

        // Coast at reduced throttle until the apoapsis target is reached.
        loop {
            if self.tlm.read(TelemetryChannel::ApoapsisAltitude) >= self.cfg.target_altitude {
                break;
            }
            self.helm
                .apply(
                    self.cmd.as_ref(),
                    Setpoint {
                        throttle: self.cfg.coast_throttle,
                        pitch: self.cfg.turn_end_pitch,
                        heading: self.cfg.heading,
                    },
                )
                .await;
            tokio::time::sleep(self.cfg.tick).await;
        }
        self.helm
            .apply(
                self.cmd.as_ref(),
                Setpoint {
                    throttle: 0.0,
                    pitch: 0.0,
                    heading: self.cfg.heading,
                },
            )
            .await;
        log!(
            "At target apoapsis: {:.0}m",
            self.tlm.read(TelemetryChannel::ApoapsisAltitude)
        );
        self.advance();

        self.cmd.set_rcs(true).await;
        let mut circ = CircularizationController::new(
            Arc::clone(&self.tlm),
            Arc::clone(&self.cmd),
            CircularizeConfig {
                heading: self.cfg.heading,
                ..CircularizeConfig::default()
            },
        );
        circ.run().await;

        monitor_token.cancel();
        monitor.await.ok();
        self.advance();

        Ok(AscentReport {
            apoapsis: self.tlm.read(TelemetryChannel::ApoapsisAltitude),
            periapsis: self.tlm.read(TelemetryChannel::PeriapsisAltitude),
            elapsed: Utc::now() - start,
        })
    }
}
