use serde::Deserialize;
use strum_macros::Display;

/// Specific-impulse context for a budget run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum IspMode {
    SeaLevel,
    Vacuum,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnginePart {
    pub name: String,
    pub isp_sea_level: f64,
    pub isp_vacuum: f64,
}

impl EnginePart {
    pub fn isp(&self, mode: IspMode) -> f64 {
        match mode {
            IspMode::SeaLevel => self.isp_sea_level,
            IspMode::Vacuum => self.isp_vacuum,
        }
    }
}

/// Parts released at one decouple event. Masses are in kilograms.
#[derive(Debug, Clone, Deserialize)]
pub struct StageGroup {
    pub wet_mass: f64,
    pub dry_mass: f64,
    #[serde(default)]
    pub engines: Vec<EnginePart>,
}

/// Static part inventory in launch order, first-to-jettison first.
/// Immutable during a budget run.
#[derive(Debug, Clone, Deserialize)]
pub struct StagePlan {
    pub stages: Vec<StageGroup>,
}

impl StagePlan {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
