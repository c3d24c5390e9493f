#![allow(dead_code, clippy::similar_names)]
#![warn(clippy::shadow_reuse, clippy::shadow_same, clippy::builtin_type_shadow)]
mod guidance;
mod logger;
mod telemetry;
mod vehicle;

use crate::guidance::{
    AscentConfig, AscentController, EveningConfig, GuidanceError, OrbitEvening, SURFACE_GRAVITY,
    TransferConfig, TransferPlanner,
};
use crate::telemetry::{TelemetryChannel, TelemetrySource};
use crate::vehicle::sim::{self, FlightProfile, SimVessel};
use crate::vehicle::{IspMode, NodeProjection, StagePlan, VehicleCommander};
use std::{env, sync::Arc};

pub const HEADING_NORTH: f64 = 0.0;
pub const HEADING_EAST: f64 = 90.0;
pub const HEADING_SOUTH: f64 = 180.0;
pub const HEADING_WEST: f64 = 270.0;

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let target_altitude = env_f64("AURIGA_TARGET_ALT", 80_000.0);
    let heading = env_f64("AURIGA_HEADING", HEADING_EAST);
    let capture_altitude = env_f64("AURIGA_CAPTURE_ALT", 300_000.0);
    let transfer_target = env::var("AURIGA_TARGET_BODY").ok();

    let vessel = Arc::new(SimVessel::new());
    sim::load_two_stage_vehicle(&vessel);
    let (driver, driver_token) =
        sim::spawn_flight_profile(Arc::clone(&vessel), FlightProfile::default());

    report_budget(IspMode::SeaLevel);

    let tlm: Arc<dyn TelemetrySource> = Arc::clone(&vessel) as Arc<dyn TelemetrySource>;
    let cmd: Arc<dyn VehicleCommander> = Arc::clone(&vessel) as Arc<dyn VehicleCommander>;

    let mut ascent = AscentController::new(
        Arc::clone(&tlm),
        Arc::clone(&cmd),
        AscentConfig {
            target_altitude,
            heading,
            ..AscentConfig::default()
        },
    );
    match ascent.fly().await {
        Ok(report) => info!(
            "Stable orbit achieved in {}s: {:.0}m x {:.0}m",
            report.elapsed.num_seconds(),
            report.apoapsis,
            report.periapsis
        ),
        Err(e) => {
            driver_token.cancel();
            fatal!("Ascent aborted: {e}");
        }
    }

    if let Some(body) = transfer_target {
        let body_name = body.clone();
        match transfer_mission(&vessel, Arc::clone(&tlm), Arc::clone(&cmd), body, capture_altitude)
            .await
        {
            Ok(()) => {
                info!("{body_name} orbit achieved");
                report_budget(IspMode::Vacuum);
            }
            Err(e) => error!("Transfer aborted: {e}"),
        }
    }

    driver_token.cancel();
    driver.await.ok();
    info!("Mission complete");
}

/// Logs the staged delta-v budget for the configured part inventory, or the
/// bundled demo inventory when none is configured.
fn report_budget(mode: IspMode) {
    let plan = match env::var("AURIGA_STAGE_PLAN") {
        Ok(path) => match std::fs::read_to_string(&path) {
            Ok(raw) => match StagePlan::from_json(&raw) {
                Ok(plan) => plan,
                Err(e) => {
                    error!("Unparsable stage plan {path}: {e}");
                    return;
                }
            },
            Err(e) => {
                error!("Cannot read stage plan {path}: {e}");
                return;
            }
        },
        Err(_) => sim::demo_stage_plan(),
    };
    match guidance::estimate(&plan, SURFACE_GRAVITY, mode) {
        Ok(budget) => {
            for (stage, dv) in budget.per_stage().iter().enumerate() {
                info!("Stage {stage} delta-v ({mode}): {dv:.0}m/s");
            }
            info!("Total delta-v budget ({mode}): {:.0}m/s", budget.total());
        }
        Err(e) => error!("Delta-v estimation failed: {e}"),
    }
}

/// Plans and flies the intercept, capture and evening sequence against the
/// dry-run vessel. The projection script below stands in for the orbit
/// propagation the external system would provide.
async fn transfer_mission(
    vessel: &Arc<SimVessel>,
    tlm: Arc<dyn TelemetrySource>,
    cmd: Arc<dyn VehicleCommander>,
    body: String,
    capture_altitude: f64,
) -> Result<(), GuidanceError> {
    let open_ut = vessel.universal_time() + 260.0;
    vessel.set_projection_model(Box::new(move |ut, prograde| NodeProjection {
        apoapsis: 320_000.0,
        periapsis: 260_000.0 + 45.0 * prograde,
        time_to_soi_change: if ut >= open_ut { 4_000.0 } else { f64::NAN },
    }));
    let planner = TransferPlanner::new(
        Arc::clone(&tlm),
        Arc::clone(&cmd),
        Some(body),
        TransferConfig::default(),
    );
    let transfer = planner.plan().await?;
    planner.execute(&transfer).await?;
    sim::stage_arrival(vessel);
    planner.capture(capture_altitude).await?;
    vessel.feed(TelemetryChannel::TimeToPeriapsis, 500.0);
    OrbitEvening::new(tlm, cmd, EveningConfig::default()).even_out().await
}
