use super::error::GuidanceError;
use crate::telemetry::{Comparison, TelemetryChannel, TelemetrySource, WaitOutcome};
use crate::vehicle::{NodeHandle, SasMode, VehicleCommander};
use crate::{burn, info, log};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Prograde delta-v assumed for the transfer burn, from known transfer
    /// energetics of the target system.
    pub estimated_prograde_dv: f64,
    /// Lead of the first candidate node over the current time.
    pub node_lead: f64,
    /// Time increment of the monotonic forward search.
    pub search_increment: f64,
    /// Upper bound on search iterations before giving up.
    pub max_search_steps: u32,
    /// Time-to-node lead at which the vehicle orients along the burn vector.
    pub orient_lead: f64,
    /// Time-to-node lead at which the burn ignites.
    pub ignition_lead: f64,
    /// Remaining delta-v below which the burn is considered done.
    pub burn_dv_cutoff: f64,
    pub wait_timeout: Duration,
    pub tick: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            estimated_prograde_dv: 860.0,
            node_lead: 60.0,
            search_increment: 100.0,
            max_search_steps: 5_000,
            orient_lead: 60.0,
            ignition_lead: 3.0,
            burn_dv_cutoff: 5.0,
            wait_timeout: Duration::from_secs(600),
            tick: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlannedTransfer {
    pub node: NodeHandle,
    pub search_steps: u32,
}

/// Burns at full throttle until the node's remaining delta-v drops below the
/// cutoff, then cuts the throttle. Shared by the transfer and orbit-evening
/// executors.
pub(crate) async fn execute_node_burn(
    cmd: &dyn VehicleCommander,
    node: NodeHandle,
    cutoff: f64,
    tick: Duration,
) {
    cmd.set_throttle(1.0).await;
    while cmd.node_remaining_dv(node) > cutoff {
        tokio::time::sleep(tick).await;
    }
    cmd.set_throttle(0.0).await;
}

/// Searches for, and executes, a prograde burn that intercepts the target
/// body's sphere of influence, then captures into orbit around it.
pub struct TransferPlanner {
    tlm: Arc<dyn TelemetrySource>,
    cmd: Arc<dyn VehicleCommander>,
    target: Option<String>,
    cfg: TransferConfig,
}

impl TransferPlanner {
    pub fn new(
        tlm: Arc<dyn TelemetrySource>,
        cmd: Arc<dyn VehicleCommander>,
        target: Option<String>,
        cfg: TransferConfig,
    ) -> Self {
        Self { tlm, cmd, target, cfg }
    }

    /// Walks a candidate node forward in time until its projected orbit
    /// leaves the current sphere of influence. The candidate is removed on
    /// search exhaustion so no stale node lingers.
    pub async fn plan(&self) -> Result<PlannedTransfer, GuidanceError> {
        let target = self.target.as_deref().ok_or(GuidanceError::NoTransferTarget)?;
        let mut ut = self.cmd.universal_time() + self.cfg.node_lead;
        let node = self.cmd.add_node(ut, self.cfg.estimated_prograde_dv).await;
        for step in 0..self.cfg.max_search_steps {
            if self.cmd.node_projection(node).has_intercept() {
                info!("Intercept with {target} found after {step} steps, burn at ut {ut:.0}");
                return Ok(PlannedTransfer { node, search_steps: step });
            }
            ut += self.cfg.search_increment;
            self.cmd.set_node_time(node, ut).await;
        }
        self.cmd.remove_node(node).await;
        Err(GuidanceError::NoIntercept { steps: self.cfg.max_search_steps })
    }

    /// Two-phase burn: orient along the node well ahead of it, ignite on the
    /// short lead, burn the node down and discard it.
    pub async fn execute(&self, transfer: &PlannedTransfer) -> Result<(), GuidanceError> {
        let node = transfer.node;
        log!(
            "Waiting for maneuver ({:.0}s)",
            self.tlm.read(TelemetryChannel::TimeToManeuver)
        );
        self.wait_node_lead(self.cfg.orient_lead).await?;
        self.cmd.set_sas(Some(SasMode::Maneuver)).await;
        self.cmd.set_rcs(true).await;
        self.wait_node_lead(self.cfg.ignition_lead).await?;
        burn!(
            "Transfer burn ignition, {:.0}m/s to go",
            self.cmd.node_remaining_dv(node)
        );
        execute_node_burn(self.cmd.as_ref(), node, self.cfg.burn_dv_cutoff, self.cfg.tick).await;
        self.cmd.set_rcs(false).await;
        self.cmd.set_sas(Some(SasMode::Stability)).await;
        self.cmd.remove_node(node).await;
        info!("Transfer burn complete");
        Ok(())
    }

    /// Retro-burn capture at the target body's periapsis: brake until the
    /// projected apoapsis closes (reads positive), then ease the periapsis
    /// down to the requested capture altitude.
    pub async fn capture(&self, capture_altitude: f64) -> Result<(), GuidanceError> {
        log!(
            "Waiting to arrive at periapsis ({:.0}s)",
            self.tlm.read(TelemetryChannel::TimeToPeriapsis)
        );
        self.wait_periapsis_lead(60.0).await?;
        self.cmd.set_rcs(true).await;
        self.cmd.set_sas(Some(SasMode::Retrograde)).await;
        self.wait_periapsis_lead(45.0).await?;
        burn!("Capture retro-burn ignition");
        self.cmd.set_throttle(0.3).await;
        // The apoapsis reads negative until the orbit closes around the new
        // reference body.
        let closed = self
            .tlm
            .await_threshold(
                TelemetryChannel::ApoapsisAltitude,
                Comparison::GreaterThan,
                0.0,
                self.cfg.wait_timeout,
            )
            .await;
        if closed == WaitOutcome::TimedOut {
            self.cmd.set_throttle(0.0).await;
            return Err(GuidanceError::WaitTimeout {
                channel: TelemetryChannel::ApoapsisAltitude,
                timeout: self.cfg.wait_timeout,
            });
        }
        self.cmd.set_throttle(0.1).await;
        while self.tlm.read(TelemetryChannel::PeriapsisAltitude) > capture_altitude {
            tokio::time::sleep(self.cfg.tick).await;
        }
        self.cmd.set_throttle(0.0).await;
        self.cmd.set_rcs(false).await;
        self.cmd.set_sas(None).await;
        info!(
            "Captured: {:.0}m x {:.0}m",
            self.tlm.read(TelemetryChannel::ApoapsisAltitude),
            self.tlm.read(TelemetryChannel::PeriapsisAltitude)
        );
        Ok(())
    }

    async fn wait_node_lead(&self, lead: f64) -> Result<(), GuidanceError> {
        self.wait_lead(TelemetryChannel::TimeToManeuver, lead).await
    }

    async fn wait_periapsis_lead(&self, lead: f64) -> Result<(), GuidanceError> {
        self.wait_lead(TelemetryChannel::TimeToPeriapsis, lead).await
    }

    async fn wait_lead(&self, channel: TelemetryChannel, lead: f64) -> Result<(), GuidanceError> {
        match self
            .tlm
            .await_threshold(channel, Comparison::LessThan, lead, self.cfg.wait_timeout)
            .await
        {
            WaitOutcome::Woken => Ok(()),
            WaitOutcome::TimedOut => Err(GuidanceError::WaitTimeout {
                channel,
                timeout: self.cfg.wait_timeout,
            }),
        }
    }
}
