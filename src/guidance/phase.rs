use strum_macros::Display;

/// Phases of one ascent run. Transitions are one-directional; staging events
/// may occur inside any ascending phase without changing the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum GuidancePhase {
    Countdown,
    Ignition,
    GravityTurn,
    CoastToApoapsis,
    Circularizing,
    Stable,
}

impl GuidancePhase {
    pub fn next(self) -> Option<GuidancePhase> {
        match self {
            GuidancePhase::Countdown => Some(GuidancePhase::Ignition),
            GuidancePhase::Ignition => Some(GuidancePhase::GravityTurn),
            GuidancePhase::GravityTurn => Some(GuidancePhase::CoastToApoapsis),
            GuidancePhase::CoastToApoapsis => Some(GuidancePhase::Circularizing),
            GuidancePhase::Circularizing => Some(GuidancePhase::Stable),
            GuidancePhase::Stable => None,
        }
    }

    pub fn is_terminal(self) -> bool { self == GuidancePhase::Stable }
}
