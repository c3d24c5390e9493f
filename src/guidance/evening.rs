use super::error::GuidanceError;
use super::transfer::execute_node_burn;
use crate::telemetry::{Comparison, TelemetryChannel, TelemetrySource, WaitOutcome};
use crate::vehicle::{SasMode, VehicleCommander};
use crate::{burn, info};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Apsis {
    Apoapsis,
    Periapsis,
}

/// Apoapsis wins on exact equality, matching the apoapsis-first convention
/// used throughout.
pub(crate) fn sooner_apsis(time_to_apoapsis: f64, time_to_periapsis: f64) -> Apsis {
    if time_to_apoapsis <= time_to_periapsis {
        Apsis::Apoapsis
    } else {
        Apsis::Periapsis
    }
}

#[derive(Debug, Clone)]
pub struct EveningConfig {
    /// Prograde adjustment per iteration.
    pub prograde_step: f64,
    pub abs_tolerance: f64,
    pub rel_tolerance: f64,
    /// Upper bound on adjustment iterations before giving up.
    pub max_steps: u32,
    pub orient_lead: f64,
    pub ignition_lead: f64,
    pub burn_dv_cutoff: f64,
    pub wait_timeout: Duration,
    pub tick: Duration,
}

impl Default for EveningConfig {
    fn default() -> Self {
        Self {
            prograde_step: 10.0,
            abs_tolerance: 1_000.0,
            rel_tolerance: 0.10,
            max_steps: 500,
            orient_lead: 60.0,
            ignition_lead: 3.0,
            burn_dv_cutoff: 5.0,
            wait_timeout: Duration::from_secs(600),
            tick: Duration::from_millis(100),
        }
    }
}

/// Exit criterion of the apsis equalizer: close enough in absolute terms
/// *or* relatively close. Either alone is sufficient.
pub fn apses_even(apoapsis: f64, periapsis: f64, cfg: &EveningConfig) -> bool {
    let diff = (apoapsis - periapsis).abs();
    diff < cfg.abs_tolerance || diff <= cfg.rel_tolerance * apoapsis.abs()
}

/// Generic closed-loop apsis equalizer for the aftermath of any coarse
/// maneuver: parks a node at the sooner apsis, walks its prograde component
/// in fixed steps until the projected apsides agree, then burns it.
pub struct OrbitEvening {
    tlm: Arc<dyn TelemetrySource>,
    cmd: Arc<dyn VehicleCommander>,
    cfg: EveningConfig,
}

impl OrbitEvening {
    pub fn new(
        tlm: Arc<dyn TelemetrySource>,
        cmd: Arc<dyn VehicleCommander>,
        cfg: EveningConfig,
    ) -> Self {
        Self { tlm, cmd, cfg }
    }

    pub async fn even_out(&self) -> Result<(), GuidanceError> {
        let time_to_apoapsis = self.tlm.read(TelemetryChannel::TimeToApoapsis);
        let time_to_periapsis = self.tlm.read(TelemetryChannel::TimeToPeriapsis);
        let apsis = sooner_apsis(time_to_apoapsis, time_to_periapsis);
        let lead = match apsis {
            Apsis::Apoapsis => time_to_apoapsis,
            Apsis::Periapsis => time_to_periapsis,
        };
        let node = self.cmd.add_node(self.cmd.universal_time() + lead, 0.0).await;

        let mut prograde = 0.0;
        let mut converged = false;
        for _ in 0..self.cfg.max_steps {
            let projection = self.cmd.node_projection(node);
            if apses_even(projection.apoapsis, projection.periapsis, &self.cfg) {
                converged = true;
                break;
            }
            // At apoapsis the periapsis is the low side, so push prograde;
            // at periapsis the apoapsis is the high side, so pull it back.
            prograde += match apsis {
                Apsis::Apoapsis => self.cfg.prograde_step,
                Apsis::Periapsis => -self.cfg.prograde_step,
            };
            self.cmd.set_node_prograde(node, prograde).await;
        }
        if !converged {
            self.cmd.remove_node(node).await;
            return Err(GuidanceError::NoConvergence { steps: self.cfg.max_steps });
        }
        info!("Evening burn at {apsis}: {prograde:.0}m/s prograde");

        self.wait_node_lead(self.cfg.orient_lead).await?;
        self.cmd.set_sas(Some(SasMode::Maneuver)).await;
        self.cmd.set_rcs(true).await;
        self.wait_node_lead(self.cfg.ignition_lead).await?;
        burn!("Evening burn ignition");
        execute_node_burn(self.cmd.as_ref(), node, self.cfg.burn_dv_cutoff, self.cfg.tick).await;
        self.cmd.set_rcs(false).await;
        self.cmd.set_sas(None).await;
        self.cmd.remove_node(node).await;
        info!("Orbit evened out");
        Ok(())
    }

    async fn wait_node_lead(&self, lead: f64) -> Result<(), GuidanceError> {
        match self
            .tlm
            .await_threshold(
                TelemetryChannel::TimeToManeuver,
                Comparison::LessThan,
                lead,
                self.cfg.wait_timeout,
            )
            .await
        {
            WaitOutcome::Woken => Ok(()),
            WaitOutcome::TimedOut => Err(GuidanceError::WaitTimeout {
                channel: TelemetryChannel::TimeToManeuver,
                timeout: self.cfg.wait_timeout,
            }),
        }
    }
}
