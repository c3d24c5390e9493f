use super::evening::sooner_apsis;
use super::*;
use crate::telemetry::{Propellant, TelemetryChannel, TelemetrySource};
use crate::vehicle::sim::{self, FlightProfile, SimVessel};
use crate::vehicle::{
    EnginePart, IspMode, NodeProjection, SasMode, StageGroup, StagePlan, VehicleCommander,
};
use crate::{info, log};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn engine(name: &str, isp: f64) -> EnginePart {
    EnginePart {
        name: name.into(),
        isp_sea_level: isp,
        isp_vacuum: isp,
    }
}

fn group(wet_mass: f64, dry_mass: f64, engines: Vec<EnginePart>) -> StageGroup {
    StageGroup { wet_mass, dry_mass, engines }
}

fn tlm(vessel: &Arc<SimVessel>) -> Arc<dyn TelemetrySource> {
    Arc::clone(vessel) as Arc<dyn TelemetrySource>
}

fn cmd(vessel: &Arc<SimVessel>) -> Arc<dyn VehicleCommander> {
    Arc::clone(vessel) as Arc<dyn VehicleCommander>
}

/// Counts maneuver time down and burns node delta-v down while the throttle
/// is open, standing in for the flight-profile driver in node-burn tests.
fn spawn_node_driver(vessel: Arc<SimVessel>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let eta = vessel.read(TelemetryChannel::TimeToManeuver);
            if eta.is_finite() && eta > 0.0 {
                vessel.feed(TelemetryChannel::TimeToManeuver, (eta - 5.0).max(0.0));
            }
            if vessel.throttle() > 0.0 {
                vessel.drain_nodes(60.0);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}

#[test]
fn test_delta_v_single_stage_matches_rocket_equation() {
    let plan = StagePlan {
        stages: vec![group(10_000.0, 4_000.0, vec![engine("LV-T45", 300.0)])],
    };
    let budget = estimate(&plan, SURFACE_GRAVITY, IspMode::Vacuum).unwrap();
    let expected = 300.0 * SURFACE_GRAVITY * (10.0f64 / 4.0).ln();
    assert_eq!(budget.per_stage().len(), 1);
    assert!((budget.per_stage()[0] - expected).abs() < 1e-9);
    assert!((budget.total() - expected).abs() < 1e-9);
}

#[test]
fn test_delta_v_randomized_plans_stay_positive_and_consistent() {
    let mut rng = rand::rng();
    for _ in 0..200 {
        let stages = (0..rng.random_range(1..=4))
            .map(|i| {
                let dry = rng.random_range(500.0..5_000.0);
                let wet = dry + rng.random_range(500.0..20_000.0);
                group(wet, dry, vec![engine(&format!("E-{i}"), rng.random_range(150.0..350.0))])
            })
            .collect();
        let budget = estimate(&StagePlan { stages }, SURFACE_GRAVITY, IspMode::SeaLevel).unwrap();
        assert!(budget.per_stage().iter().all(|dv| *dv > 0.0));
        let sum: f64 = budget.per_stage().iter().sum();
        assert!((budget.total() - sum).abs() < 1e-6);
    }
}

#[test]
fn test_delta_v_counts_duplicate_engines_once() {
    let single = StagePlan {
        stages: vec![group(8_000.0, 3_000.0, vec![engine("RT-10", 195.0)])],
    };
    let doubled = StagePlan {
        stages: vec![group(
            8_000.0,
            3_000.0,
            vec![engine("RT-10", 195.0), engine("RT-10", 195.0)],
        )],
    };
    let lone = estimate(&single, SURFACE_GRAVITY, IspMode::Vacuum).unwrap();
    let pair = estimate(&doubled, SURFACE_GRAVITY, IspMode::Vacuum).unwrap();
    assert!((lone.total() - pair.total()).abs() < 1e-12);
}

#[test]
fn test_delta_v_engineless_stage_shifts_boundary() {
    let plan = StagePlan {
        stages: vec![
            group(400.0, 400.0, vec![]),
            group(6_300.0, 2_100.0, vec![engine("LV-909", 345.0)]),
        ],
    };
    let budget = estimate(&plan, SURFACE_GRAVITY, IspMode::Vacuum).unwrap();
    assert!(budget.per_stage()[0].abs() < 1e-12);
    // The jettisoned ring sits below the upper stage's separation plane.
    let expected = 345.0 * SURFACE_GRAVITY * ((0.4_f64 + 6.3) / (2.1 + 0.4)).ln();
    assert!((budget.per_stage()[1] - expected).abs() < 1e-9);
}

#[test]
fn test_delta_v_non_finite_result_is_an_error() {
    let plan = StagePlan {
        stages: vec![group(5_000.0, 0.0, vec![engine("X", 250.0)])],
    };
    match estimate(&plan, SURFACE_GRAVITY, IspMode::Vacuum) {
        Err(GuidanceError::Computation { stage: 0, .. }) => {}
        other => panic!("expected computation error, got {other:?}"),
    }
}

#[test]
fn test_gravity_turn_pitch_clamps_outside_band() {
    let cfg = AscentConfig::default();
    assert!((gravity_turn_pitch(&cfg, 0.0) - 90.0).abs() < 1e-9);
    assert!((gravity_turn_pitch(&cfg, cfg.turn_start_altitude) - 90.0).abs() < 1e-9);
    assert!((gravity_turn_pitch(&cfg, cfg.turn_end_altitude) - 45.0).abs() < 1e-9);
    assert!((gravity_turn_pitch(&cfg, 1.0e9) - 45.0).abs() < 1e-9);

    let mut rng = rand::rng();
    for _ in 0..100 {
        let altitude = rng.random_range(-10_000.0..200_000.0);
        let pitch = gravity_turn_pitch(&cfg, altitude);
        assert!((45.0..=90.0).contains(&pitch), "pitch {pitch} at {altitude}m");
    }
}

#[test]
fn test_circularize_throttle_stays_in_range() {
    let cfg = CircularizeConfig::default();
    for tta in [
        -100.0,
        0.0,
        5.0,
        15.0,
        22.5,
        30.0,
        60.0,
        1.0e12,
        f64::NAN,
        f64::INFINITY,
        f64::NEG_INFINITY,
    ] {
        let throttle = shaped_throttle(&cfg, tta);
        assert!((0.0..=1.0).contains(&throttle), "throttle {throttle} at tta {tta}");
    }
    // Ramps from zero at the window edge to full at the minimum lead.
    assert!(shaped_throttle(&cfg, cfg.max_window).abs() < 1e-9);
    assert!((shaped_throttle(&cfg, 22.5) - 0.5).abs() < 1e-9);
    assert!((shaped_throttle(&cfg, cfg.min_window) - 1.0).abs() < 1e-9);
    // Inside the minimum lead only the floor remains.
    assert!((shaped_throttle(&cfg, 10.0) - cfg.throttle_floor).abs() < 1e-12);
    assert!(shaped_throttle(&cfg, f64::NAN).abs() < 1e-12);
}

#[test]
fn test_circularize_pitch_sweeps_the_bias_band() {
    let cfg = CircularizeConfig::default();
    assert!((shaped_pitch(&cfg, cfg.max_window) + cfg.pitch_bias).abs() < 1e-9);
    assert!(shaped_pitch(&cfg, 22.5).abs() < 1e-9);
    assert!((shaped_pitch(&cfg, cfg.min_window) - cfg.pitch_bias).abs() < 1e-9);
    assert!(shaped_pitch(&cfg, f64::INFINITY).abs() < 1e-12);
}

#[test]
fn test_phase_progression_is_one_directional() {
    let mut phase = GuidancePhase::Countdown;
    let mut visited = 1;
    while let Some(next) = phase.next() {
        assert!(next > phase);
        phase = next;
        visited += 1;
    }
    assert_eq!(visited, 6);
    assert!(phase.is_terminal());
    assert!(!GuidancePhase::Circularizing.is_terminal());
}

#[test]
fn test_apses_even_absolute_or_relative() {
    let cfg = EveningConfig::default();
    // Absolute tolerance alone.
    assert!(apses_even(100_500.0, 100_000.0, &cfg));
    // Relative tolerance alone, the absolute gap is 50km.
    assert!(apses_even(1_000_000.0, 950_000.0, &cfg));
    assert!(!apses_even(100_000.0, 50_000.0, &cfg));
}

#[test]
fn test_sooner_apsis_tie_goes_to_apoapsis() {
    assert_eq!(sooner_apsis(40.0, 40.0), Apsis::Apoapsis);
    assert_eq!(sooner_apsis(40.0, 200.0), Apsis::Apoapsis);
    assert_eq!(sooner_apsis(90.0, 40.0), Apsis::Periapsis);
}

#[tokio::test]
async fn test_staging_guard_fires_at_most_once_per_stage() {
    let vessel = Arc::new(SimVessel::new());
    vessel.set_current_stage(3);
    let guard = Arc::new(StagingGuard::new(cmd(&vessel)));
    let (a, b) = tokio::join!(guard.separate(2), guard.separate(2));
    assert!(a ^ b, "exactly one concurrent caller may win");
    assert_eq!(vessel.activations(), 1);
    assert!(!guard.separate(2).await);
    assert_eq!(vessel.activations(), 1);
    // A different stage index is a fresh latch.
    assert!(guard.separate(1).await);
    assert_eq!(vessel.activations(), 2);
}

#[tokio::test]
async fn test_auto_stage_advances_decouple_only_stage_immediately() {
    let vessel = Arc::new(SimVessel::new());
    vessel.set_current_stage(2);
    vessel.load_stage(1, &[]);
    vessel.load_stage(0, &[(Propellant::LiquidFuel, 100.0)]);
    let guard = Arc::new(StagingGuard::new(cmd(&vessel)));
    let (handle, token) = AutoStageMonitor::spawn(tlm(&vessel), guard, 0.1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(vessel.activations(), 1);
    assert_eq!(vessel.current_stage(), 1);

    // The liquid stage still holds fuel, so nothing further fires.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(vessel.activations(), 1);

    token.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_auto_stage_fires_on_fuel_depletion() {
    let vessel = Arc::new(SimVessel::new());
    vessel.set_current_stage(2);
    vessel.load_stage(1, &[(Propellant::SolidFuel, 5.0)]);
    vessel.load_stage(0, &[(Propellant::LiquidFuel, 100.0)]);
    let guard = Arc::new(StagingGuard::new(cmd(&vessel)));
    let (handle, token) = AutoStageMonitor::spawn(tlm(&vessel), guard, 0.1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(vessel.activations(), 0, "must not fire while fuel remains");

    vessel.set_stage_fuel(1, Propellant::SolidFuel, 0.05);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(vessel.activations(), 1);
    assert_eq!(vessel.current_stage(), 1);

    token.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_auto_stage_cancellation_suppresses_final_activation() {
    let vessel = Arc::new(SimVessel::new());
    vessel.set_current_stage(2);
    vessel.load_stage(1, &[(Propellant::SolidFuel, 5.0)]);
    let guard = Arc::new(StagingGuard::new(cmd(&vessel)));
    let (handle, token) = AutoStageMonitor::spawn(tlm(&vessel), guard, 0.1);

    tokio::time::sleep(Duration::from_millis(30)).await;
    token.cancel();
    // Fuel runs out after the shutdown request; no activation may follow.
    vessel.set_stage_fuel(1, Propellant::SolidFuel, 0.0);
    tokio::time::timeout(Duration::from_millis(500), handle)
        .await
        .expect("monitor must exit within one polling tick")
        .unwrap();
    assert_eq!(vessel.activations(), 0);
}

fn fast_ascent_config() -> AscentConfig {
    AscentConfig {
        countdown_hold: Duration::from_millis(50),
        tick: Duration::from_millis(5),
        climb_timeout: Duration::from_secs(10),
        ..AscentConfig::default()
    }
}

fn fast_profile() -> FlightProfile {
    FlightProfile {
        tick: Duration::from_millis(2),
        time_scale: 500.0,
        ..FlightProfile::default()
    }
}

#[tokio::test]
async fn test_ascent_reaches_orbit_with_fuel_triggered_staging() {
    let vessel = Arc::new(SimVessel::new());
    sim::load_two_stage_vehicle(&vessel);
    let (driver, driver_token) = sim::spawn_flight_profile(Arc::clone(&vessel), fast_profile());

    let mut ascent = AscentController::new(tlm(&vessel), cmd(&vessel), fast_ascent_config());
    let report = tokio::time::timeout(Duration::from_secs(30), ascent.fly())
        .await
        .expect("ascent must finish")
        .unwrap();
    driver_token.cancel();
    driver.await.unwrap();

    log!("Ascent finished in {}ms", report.elapsed.num_milliseconds());
    assert!(ascent.phase().is_terminal());
    assert!(report.apoapsis >= 80_000.0);
    assert!(report.periapsis >= 0.99 * 80_000.0);
    // Launch clamps plus the spent boosters, nothing else.
    assert_eq!(vessel.activations(), 2);
    assert_eq!(vessel.current_stage(), 1);
    assert!(vessel.throttle().abs() < 1e-9);
    assert!(!vessel.rcs());
}

#[tokio::test]
async fn test_ascent_forces_booster_separation_near_target() {
    let vessel = Arc::new(SimVessel::new());
    sim::load_two_stage_vehicle(&vessel);
    // Boosters never run dry, so only the forced cutoff can shed them.
    let profile = FlightProfile { fuel_drain: 0.0, ..fast_profile() };
    let (driver, driver_token) = sim::spawn_flight_profile(Arc::clone(&vessel), profile);

    let mut ascent = AscentController::new(tlm(&vessel), cmd(&vessel), fast_ascent_config());
    let report = tokio::time::timeout(Duration::from_secs(30), ascent.fly())
        .await
        .expect("ascent must finish")
        .unwrap();
    driver_token.cancel();
    driver.await.unwrap();

    assert!(ascent.phase().is_terminal());
    assert_eq!(vessel.activations(), 2);
    assert_eq!(vessel.current_stage(), 1);
    assert!(report.periapsis >= 0.99 * 80_000.0);
    info!("Forced-separation ascent: {:.0}m x {:.0}m", report.apoapsis, report.periapsis);
}

#[tokio::test]
async fn test_ascent_aborts_when_climb_stalls() {
    let vessel = Arc::new(SimVessel::new());
    sim::load_two_stage_vehicle(&vessel);
    // No flight-profile driver: the altitude feed never moves.
    let cfg = AscentConfig {
        countdown_hold: Duration::from_millis(10),
        climb_timeout: Duration::from_millis(100),
        ..AscentConfig::default()
    };
    let mut ascent = AscentController::new(tlm(&vessel), cmd(&vessel), cfg);
    match ascent.fly().await {
        Err(GuidanceError::WaitTimeout { channel: TelemetryChannel::Altitude, .. }) => {}
        other => panic!("expected climb timeout, got {other:?}"),
    }
    assert_eq!(ascent.phase(), GuidancePhase::Ignition);
}

#[tokio::test]
async fn test_transfer_search_advances_by_fixed_increment() {
    let vessel = Arc::new(SimVessel::new());
    const STEPS_TO_WINDOW: u32 = 7;
    let cfg = TransferConfig { max_search_steps: 50, ..TransferConfig::default() };
    let open_ut = cfg.node_lead + f64::from(STEPS_TO_WINDOW) * cfg.search_increment;
    vessel.set_projection_model(Box::new(move |ut, _| NodeProjection {
        apoapsis: 900_000.0,
        periapsis: 200_000.0,
        time_to_soi_change: if ut >= open_ut { 4_000.0 } else { f64::NAN },
    }));

    let planner = TransferPlanner::new(tlm(&vessel), cmd(&vessel), Some("Mun".into()), cfg);
    let transfer = planner.plan().await.unwrap();
    assert_eq!(transfer.search_steps, STEPS_TO_WINDOW);
    assert!((vessel.node_time(transfer.node) - open_ut).abs() < 1e-9);
    assert_eq!(vessel.node_count(), 1);
}

#[tokio::test]
async fn test_transfer_search_is_bounded_and_cleans_up() {
    let vessel = Arc::new(SimVessel::new());
    vessel.set_projection_model(Box::new(|_, _| NodeProjection {
        apoapsis: f64::NAN,
        periapsis: f64::NAN,
        time_to_soi_change: f64::NAN,
    }));
    let planner = TransferPlanner::new(
        tlm(&vessel),
        cmd(&vessel),
        Some("Mun".into()),
        TransferConfig { max_search_steps: 25, ..TransferConfig::default() },
    );
    match planner.plan().await {
        Err(GuidanceError::NoIntercept { steps: 25 }) => {}
        other => panic!("expected exhausted search, got {other:?}"),
    }
    assert_eq!(vessel.node_count(), 0, "exhausted search must remove its candidate node");
}

#[tokio::test]
async fn test_transfer_without_target_is_refused() {
    let vessel = Arc::new(SimVessel::new());
    let planner =
        TransferPlanner::new(tlm(&vessel), cmd(&vessel), None, TransferConfig::default());
    assert!(matches!(planner.plan().await, Err(GuidanceError::NoTransferTarget)));
    assert_eq!(vessel.node_count(), 0);
}

#[tokio::test]
async fn test_transfer_execute_burns_the_node_down() {
    let vessel = Arc::new(SimVessel::new());
    vessel.set_projection_model(Box::new(|_, _| NodeProjection {
        apoapsis: 0.0,
        periapsis: 0.0,
        time_to_soi_change: 500.0,
    }));
    let cfg = TransferConfig {
        tick: Duration::from_millis(5),
        wait_timeout: Duration::from_secs(5),
        ..TransferConfig::default()
    };
    let planner = TransferPlanner::new(tlm(&vessel), cmd(&vessel), Some("Mun".into()), cfg);
    let transfer = planner.plan().await.unwrap();
    assert_eq!(transfer.search_steps, 0);

    let driver = spawn_node_driver(Arc::clone(&vessel));
    tokio::time::timeout(Duration::from_secs(10), planner.execute(&transfer))
        .await
        .expect("burn must finish")
        .unwrap();
    driver.abort();

    assert_eq!(vessel.node_count(), 0);
    assert!(vessel.throttle().abs() < 1e-9);
    assert!(!vessel.rcs());
    assert_eq!(vessel.sas(), Some(SasMode::Stability));
}

#[tokio::test]
async fn test_capture_brakes_to_target_periapsis() {
    let vessel = Arc::new(SimVessel::new());
    sim::stage_arrival(&vessel);
    let (driver, driver_token) = sim::spawn_flight_profile(Arc::clone(&vessel), fast_profile());

    let cfg = TransferConfig {
        tick: Duration::from_millis(5),
        wait_timeout: Duration::from_secs(10),
        ..TransferConfig::default()
    };
    let planner = TransferPlanner::new(tlm(&vessel), cmd(&vessel), Some("Mun".into()), cfg);
    tokio::time::timeout(Duration::from_secs(30), planner.capture(300_000.0))
        .await
        .expect("capture must finish")
        .unwrap();
    driver_token.cancel();
    driver.await.unwrap();

    assert!(vessel.read(TelemetryChannel::ApoapsisAltitude) > 0.0, "orbit must be closed");
    assert!(vessel.read(TelemetryChannel::PeriapsisAltitude) <= 300_000.0);
    assert!(vessel.throttle().abs() < 1e-9);
    assert!(!vessel.rcs());
    assert_eq!(vessel.sas(), None);
}

#[tokio::test]
async fn test_orbit_evening_raises_periapsis_without_overshoot() {
    let vessel = Arc::new(SimVessel::new());
    vessel.feed(TelemetryChannel::TimeToApoapsis, 40.0);
    vessel.feed(TelemetryChannel::TimeToPeriapsis, 200.0);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    vessel.set_projection_model(Box::new(move |_, prograde| {
        let projection = NodeProjection {
            apoapsis: 100_000.0,
            periapsis: 50_000.0 + 450.0 * prograde,
            time_to_soi_change: f64::NAN,
        };
        recorder.lock().unwrap().push(projection);
        projection
    }));

    let driver = spawn_node_driver(Arc::clone(&vessel));
    let evening = OrbitEvening::new(
        tlm(&vessel),
        cmd(&vessel),
        EveningConfig {
            tick: Duration::from_millis(5),
            wait_timeout: Duration::from_secs(5),
            ..EveningConfig::default()
        },
    );
    tokio::time::timeout(Duration::from_secs(10), evening.even_out())
        .await
        .expect("evening must finish")
        .unwrap();
    driver.abort();

    assert_eq!(vessel.node_count(), 0);
    assert!(vessel.throttle().abs() < 1e-9);
    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|p| p.periapsis <= p.apoapsis), "periapsis must never overshoot");
    let last = seen.last().unwrap();
    assert!(apses_even(last.apoapsis, last.periapsis, &EveningConfig::default()));
    info!("Evening converged after {} projection queries", seen.len());
}

#[tokio::test]
async fn test_orbit_evening_gives_up_after_step_bound() {
    let vessel = Arc::new(SimVessel::new());
    vessel.feed(TelemetryChannel::TimeToApoapsis, 40.0);
    vessel.feed(TelemetryChannel::TimeToPeriapsis, 200.0);
    // The projected gap never narrows no matter the adjustment.
    vessel.set_projection_model(Box::new(|_, _| NodeProjection {
        apoapsis: 100_000.0,
        periapsis: 20_000.0,
        time_to_soi_change: f64::NAN,
    }));
    let evening = OrbitEvening::new(
        tlm(&vessel),
        cmd(&vessel),
        EveningConfig { max_steps: 10, ..EveningConfig::default() },
    );
    match evening.even_out().await {
        Err(GuidanceError::NoConvergence { steps: 10 }) => {}
        other => panic!("expected convergence failure, got {other:?}"),
    }
    assert_eq!(vessel.node_count(), 0, "failed evening must remove its node");
}
