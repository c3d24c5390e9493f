//! In-process stand-in for the external vehicle simulation. Implements both
//! boundary traits over shared state and watch-backed telemetry channels so
//! the guidance stack can be dry-run and tested deterministically.

use super::commander::{NodeHandle, NodeProjection, SasMode, VehicleCommander};
use super::stage::{EnginePart, StageGroup, StagePlan};
use crate::telemetry::{Propellant, TelemetryChannel, TelemetrySource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use strum::IntoEnumIterator;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const POISONED: &str = "sim state lock poisoned";

/// Maps a candidate node (scheduled time, prograde component) to its
/// projected orbit. Installed per scenario.
pub type ProjectionModel = Box<dyn Fn(f64, f64) -> NodeProjection + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct SimNode {
    ut: f64,
    prograde: f64,
    remaining_dv: f64,
}

#[derive(Default)]
struct SimState {
    throttle: f64,
    pitch: f64,
    heading: f64,
    rcs: bool,
    sas: Option<SasMode>,
    current_stage: i32,
    activations: u32,
    throttle_cmds: u32,
    pitch_cmds: u32,
    heading_cmds: u32,
    stage_propellants: HashMap<i32, Vec<Propellant>>,
    stage_fuel: HashMap<(i32, Propellant), f64>,
    nodes: HashMap<u32, SimNode>,
    next_node_id: u32,
    ut: f64,
}

fn fuel_totals(state: &SimState) -> Vec<(Propellant, f64)> {
    Propellant::iter()
        .map(|p| {
            let total = state
                .stage_fuel
                .iter()
                .filter(|((_, prop), _)| *prop == p)
                .map(|(_, amount)| *amount)
                .sum();
            (p, total)
        })
        .collect()
}

pub struct SimVessel {
    state: RwLock<SimState>,
    channels: HashMap<TelemetryChannel, watch::Sender<f64>>,
    projection: RwLock<Option<ProjectionModel>>,
}

impl SimVessel {
    pub fn new() -> Self {
        let mut channels = HashMap::new();
        for ch in Self::all_channels() {
            let initial = match ch {
                TelemetryChannel::TimeToSoiChange => f64::NAN,
                TelemetryChannel::TimeToManeuver => f64::INFINITY,
                _ => 0.0,
            };
            channels.insert(ch, watch::channel(initial).0);
        }
        Self {
            state: RwLock::new(SimState::default()),
            channels,
            projection: RwLock::new(None),
        }
    }

    fn all_channels() -> Vec<TelemetryChannel> {
        let mut channels = vec![
            TelemetryChannel::Altitude,
            TelemetryChannel::ApoapsisAltitude,
            TelemetryChannel::PeriapsisAltitude,
            TelemetryChannel::TimeToApoapsis,
            TelemetryChannel::TimeToPeriapsis,
            TelemetryChannel::TimeToSoiChange,
            TelemetryChannel::TimeToManeuver,
        ];
        channels.extend(Propellant::iter().map(TelemetryChannel::Fuel));
        channels
    }

    /// Pushes a new value onto a telemetry channel.
    pub fn feed(&self, channel: TelemetryChannel, value: f64) {
        self.channels[&channel].send_replace(value);
    }

    pub fn set_current_stage(&self, stage: i32) {
        self.state.write().expect(POISONED).current_stage = stage;
    }

    /// Seeds the resource set of one stage and republishes fuel totals.
    pub fn load_stage(&self, stage: i32, resources: &[(Propellant, f64)]) {
        let totals = {
            let mut state = self.state.write().expect(POISONED);
            state
                .stage_propellants
                .insert(stage, resources.iter().map(|(p, _)| *p).collect());
            for (p, amount) in resources {
                state.stage_fuel.insert((stage, *p), *amount);
            }
            fuel_totals(&state)
        };
        for (p, total) in totals {
            self.feed(TelemetryChannel::Fuel(p), total);
        }
    }

    pub fn set_stage_fuel(&self, stage: i32, propellant: Propellant, amount: f64) {
        let totals = {
            let mut state = self.state.write().expect(POISONED);
            state.stage_fuel.insert((stage, propellant), amount);
            fuel_totals(&state)
        };
        for (p, total) in totals {
            self.feed(TelemetryChannel::Fuel(p), total);
        }
    }

    pub fn set_projection_model(&self, model: ProjectionModel) {
        *self.projection.write().expect(POISONED) = Some(model);
    }

    pub fn set_node_remaining(&self, node: NodeHandle, dv: f64) {
        if let Some(n) = self.state.write().expect(POISONED).nodes.get_mut(&node.0) {
            n.remaining_dv = dv;
        }
    }

    /// Burns down every node's remaining delta-v by a fixed amount.
    pub fn drain_nodes(&self, amount: f64) {
        for node in self.state.write().expect(POISONED).nodes.values_mut() {
            node.remaining_dv = (node.remaining_dv - amount).max(0.0);
        }
    }

    pub fn node_time(&self, node: NodeHandle) -> f64 {
        self.state.read().expect(POISONED).nodes.get(&node.0).map_or(f64::NAN, |n| n.ut)
    }

    pub fn node_count(&self) -> usize { self.state.read().expect(POISONED).nodes.len() }

    pub fn throttle(&self) -> f64 { self.state.read().expect(POISONED).throttle }

    pub fn pitch(&self) -> f64 { self.state.read().expect(POISONED).pitch }

    pub fn heading(&self) -> f64 { self.state.read().expect(POISONED).heading }

    pub fn rcs(&self) -> bool { self.state.read().expect(POISONED).rcs }

    pub fn sas(&self) -> Option<SasMode> { self.state.read().expect(POISONED).sas }

    pub fn activations(&self) -> u32 { self.state.read().expect(POISONED).activations }

    pub fn command_counts(&self) -> (u32, u32, u32) {
        let state = self.state.read().expect(POISONED);
        (state.throttle_cmds, state.pitch_cmds, state.heading_cmds)
    }

    /// Advances the scripted flight profile by one tick. The profile reacts
    /// to the commanded throttle and SAS mode, not to any orbital mechanics:
    /// just enough response for the control loops to close.
    fn profile_tick(&self, p: &FlightProfile) {
        let dt = p.tick.as_secs_f64() * p.time_scale;
        let mut altitude = self.read(TelemetryChannel::Altitude);
        let mut apoapsis = self.read(TelemetryChannel::ApoapsisAltitude);
        let mut periapsis = self.read(TelemetryChannel::PeriapsisAltitude);
        let ttp = (self.read(TelemetryChannel::TimeToPeriapsis) - dt).max(0.0);
        let eta;
        {
            let mut state = self.state.write().expect(POISONED);
            state.ut += dt;
            let ut_now = state.ut;
            let throttle = state.throttle;
            let retro = state.sas == Some(SasMode::Retrograde);
            if throttle > 0.0 {
                if retro {
                    apoapsis += p.apo_rate * throttle * dt;
                    periapsis -= p.peri_rate * throttle * dt;
                } else {
                    altitude += p.climb_rate * throttle * dt;
                    apoapsis += p.apo_rate * throttle * dt;
                    if state.pitch.abs() <= 15.0 {
                        periapsis = (periapsis + p.peri_rate * throttle * dt).min(apoapsis);
                    }
                }
                let active = state.current_stage - 1;
                let first =
                    state.stage_propellants.get(&active).and_then(|v| v.first().copied());
                if let Some(prop) = first {
                    if let Some(amount) = state.stage_fuel.get_mut(&(active, prop)) {
                        *amount = (*amount - p.fuel_drain * throttle * dt).max(0.0);
                    }
                }
                for node in state.nodes.values_mut() {
                    node.remaining_dv =
                        (node.remaining_dv - p.node_dv_drain * throttle * dt).max(0.0);
                }
            }
            eta = state.nodes.values().map(|n| n.ut - ut_now).fold(f64::INFINITY, f64::min);
            let totals = fuel_totals(&state);
            drop(state);
            for (prop, total) in totals {
                self.feed(TelemetryChannel::Fuel(prop), total);
            }
        }
        self.feed(TelemetryChannel::Altitude, altitude);
        self.feed(TelemetryChannel::ApoapsisAltitude, apoapsis);
        self.feed(TelemetryChannel::PeriapsisAltitude, periapsis);
        self.feed(TelemetryChannel::TimeToApoapsis, p.hold_tta);
        self.feed(TelemetryChannel::TimeToPeriapsis, ttp);
        self.feed(TelemetryChannel::TimeToManeuver, eta);
    }
}

impl Default for SimVessel {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl TelemetrySource for SimVessel {
    fn read(&self, channel: TelemetryChannel) -> f64 { *self.channels[&channel].borrow() }

    fn subscribe(&self, channel: TelemetryChannel) -> watch::Receiver<f64> {
        self.channels[&channel].subscribe()
    }

    fn current_stage(&self) -> i32 { self.state.read().expect(POISONED).current_stage }

    fn stage_propellants(&self, stage: i32) -> Vec<Propellant> {
        self.state.read().expect(POISONED).stage_propellants.get(&stage).cloned().unwrap_or_default()
    }

    fn stage_fuel(&self, stage: i32, propellant: Propellant) -> f64 {
        self.state
            .read()
            .expect(POISONED)
            .stage_fuel
            .get(&(stage, propellant))
            .copied()
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl VehicleCommander for SimVessel {
    async fn set_throttle(&self, throttle: f64) {
        let mut state = self.state.write().expect(POISONED);
        state.throttle = throttle.clamp(0.0, 1.0);
        state.throttle_cmds += 1;
    }

    async fn set_target_pitch(&self, pitch: f64) {
        let mut state = self.state.write().expect(POISONED);
        state.pitch = pitch;
        state.pitch_cmds += 1;
    }

    async fn set_target_heading(&self, heading: f64) {
        let mut state = self.state.write().expect(POISONED);
        state.heading = heading;
        state.heading_cmds += 1;
    }

    async fn set_rcs(&self, enabled: bool) {
        self.state.write().expect(POISONED).rcs = enabled;
    }

    async fn set_sas(&self, mode: Option<SasMode>) {
        self.state.write().expect(POISONED).sas = mode;
    }

    async fn activate_next_stage(&self) {
        let totals = {
            let mut state = self.state.write().expect(POISONED);
            let jettisoned = state.current_stage - 1;
            state.stage_fuel.retain(|(stage, _), _| *stage != jettisoned);
            state.stage_propellants.remove(&jettisoned);
            state.current_stage -= 1;
            state.activations += 1;
            fuel_totals(&state)
        };
        for (p, total) in totals {
            self.feed(TelemetryChannel::Fuel(p), total);
        }
    }

    async fn add_node(&self, ut: f64, prograde: f64) -> NodeHandle {
        let (id, eta) = {
            let mut state = self.state.write().expect(POISONED);
            let id = state.next_node_id;
            state.next_node_id += 1;
            state.nodes.insert(id, SimNode { ut, prograde, remaining_dv: prograde.abs() });
            (id, ut - state.ut)
        };
        self.feed(TelemetryChannel::TimeToManeuver, eta);
        NodeHandle(id)
    }

    async fn set_node_time(&self, node: NodeHandle, ut: f64) {
        let eta = {
            let mut state = self.state.write().expect(POISONED);
            let now = state.ut;
            if let Some(n) = state.nodes.get_mut(&node.0) {
                n.ut = ut;
            }
            ut - now
        };
        self.feed(TelemetryChannel::TimeToManeuver, eta);
    }

    async fn set_node_prograde(&self, node: NodeHandle, prograde: f64) {
        if let Some(n) = self.state.write().expect(POISONED).nodes.get_mut(&node.0) {
            n.prograde = prograde;
            n.remaining_dv = prograde.abs();
        }
    }

    async fn remove_node(&self, node: NodeHandle) {
        self.state.write().expect(POISONED).nodes.remove(&node.0);
        self.feed(TelemetryChannel::TimeToManeuver, f64::INFINITY);
    }

    fn node_projection(&self, node: NodeHandle) -> NodeProjection {
        let blank = NodeProjection {
            apoapsis: f64::NAN,
            periapsis: f64::NAN,
            time_to_soi_change: f64::NAN,
        };
        let Some(n) = self.state.read().expect(POISONED).nodes.get(&node.0).copied() else {
            return blank;
        };
        match &*self.projection.read().expect(POISONED) {
            Some(model) => model(n.ut, n.prograde),
            None => blank,
        }
    }

    fn node_remaining_dv(&self, node: NodeHandle) -> f64 {
        self.state.read().expect(POISONED).nodes.get(&node.0).map_or(0.0, |n| n.remaining_dv)
    }

    fn universal_time(&self) -> f64 { self.state.read().expect(POISONED).ut }
}

/// Tunables of the scripted flight profile. Rates are per profile-second at
/// full throttle; `time_scale` is profile-seconds per wall-clock second.
#[derive(Debug, Clone)]
pub struct FlightProfile {
    pub tick: Duration,
    pub time_scale: f64,
    pub climb_rate: f64,
    pub apo_rate: f64,
    pub peri_rate: f64,
    pub fuel_drain: f64,
    pub hold_tta: f64,
    pub node_dv_drain: f64,
}

impl Default for FlightProfile {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(25),
            time_scale: 40.0,
            climb_rate: 300.0,
            apo_rate: 400.0,
            peri_rate: 800.0,
            fuel_drain: 0.15,
            hold_tta: 20.0,
            node_dv_drain: 20.0,
        }
    }
}

/// Drives the scripted flight profile until cancelled.
pub fn spawn_flight_profile(
    vessel: Arc<SimVessel>,
    profile: FlightProfile,
) -> (JoinHandle<()>, CancellationToken) {
    let token = CancellationToken::new();
    let t = token.clone();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = t.cancelled() => return,
                () = tokio::time::sleep(profile.tick) => {}
            }
            vessel.profile_tick(&profile);
        }
    });
    (handle, token)
}

/// Seeds the staging convention the guidance stack assumes: solid boosters
/// below a liquid-fuel stage, launch clamps on top of the stack.
pub fn load_two_stage_vehicle(vessel: &SimVessel) {
    vessel.set_current_stage(3);
    vessel.load_stage(1, &[(Propellant::SolidFuel, 20.0)]);
    vessel.load_stage(
        0,
        &[(Propellant::LiquidFuel, 1000.0), (Propellant::Oxidizer, 1200.0)],
    );
}

/// Part inventory matching [`load_two_stage_vehicle`], in jettison order.
pub fn demo_stage_plan() -> StagePlan {
    StagePlan {
        stages: vec![
            StageGroup {
                wet_mass: 11_250.0,
                dry_mass: 4_500.0,
                engines: vec![
                    EnginePart {
                        name: "RT-10".into(),
                        isp_sea_level: 170.0,
                        isp_vacuum: 195.0,
                    },
                    EnginePart {
                        name: "RT-10".into(),
                        isp_sea_level: 170.0,
                        isp_vacuum: 195.0,
                    },
                ],
            },
            StageGroup { wet_mass: 400.0, dry_mass: 400.0, engines: vec![] },
            StageGroup {
                wet_mass: 6_300.0,
                dry_mass: 2_100.0,
                engines: vec![EnginePart {
                    name: "LV-909".into(),
                    isp_sea_level: 85.0,
                    isp_vacuum: 345.0,
                }],
            },
        ],
    }
}

/// Re-seeds the feed to the arrival conditions at a secondary body: closest
/// approach ahead, projected orbit still open (negative apoapsis reading).
pub fn stage_arrival(vessel: &SimVessel) {
    vessel.feed(TelemetryChannel::ApoapsisAltitude, -3_000.0);
    vessel.feed(TelemetryChannel::PeriapsisAltitude, 320_000.0);
    vessel.feed(TelemetryChannel::TimeToPeriapsis, 120.0);
}
