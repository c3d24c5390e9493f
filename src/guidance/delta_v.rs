use super::error::GuidanceError;
use crate::vehicle::{IspMode, StagePlan};
use itertools::Itertools;

pub const SURFACE_GRAVITY: f64 = 9.81;

const KG_PER_TONNE: f64 = 1000.0;

/// Staged rocket-equation budget.
#[derive(Debug, Clone)]
pub struct DeltaVBudget {
    per_stage: Vec<f64>,
    total: f64,
}

impl DeltaVBudget {
    pub fn per_stage(&self) -> &[f64] { &self.per_stage }

    pub fn total(&self) -> f64 { self.total }
}

/// Computes the per-stage and total delta-v budget for a stage plan.
///
/// Stages are processed in jettison order, earliest-released first. The
/// running vehicle mass accumulates wet masses monotonically while the spent
/// boundary tracks mass already below the separation plane, so a stage's mass
/// ratio only sees its own dry mass plus everything jettisoned before it.
/// Duplicate engines within one stage group are counted once. A stage with no
/// engines contributes zero delta-v but still shifts the boundary.
pub fn estimate(
    plan: &StagePlan,
    gravity: f64,
    mode: IspMode,
) -> Result<DeltaVBudget, GuidanceError> {
    let mut total_mass = 0.0;
    let mut spent_mass = 0.0;
    let mut per_stage = Vec::with_capacity(plan.stages.len());
    for (stage, group) in plan.stages.iter().enumerate() {
        total_mass += group.wet_mass / KG_PER_TONNE;
        let boundary_mass = group.dry_mass / KG_PER_TONNE + spent_mass;
        let stage_dv = if group.engines.is_empty() {
            0.0
        } else {
            let isp: f64 = group
                .engines
                .iter()
                .unique_by(|e| e.name.as_str())
                .map(|e| e.isp(mode))
                .sum();
            let ratio = total_mass / boundary_mass;
            let dv = isp * gravity * ratio.ln();
            if !dv.is_finite() {
                return Err(GuidanceError::Computation { stage, ratio });
            }
            dv
        };
        per_stage.push(stage_dv);
        spent_mass += group.wet_mass / KG_PER_TONNE;
    }
    let total = per_stage.iter().sum();
    Ok(DeltaVBudget { per_stage, total })
}
