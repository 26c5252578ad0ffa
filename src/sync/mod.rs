mod correlator;
mod pitch_match;
mod planner;

pub use correlator::{EventCorrelator, UnplacedPolicy, Waypoint};
pub use pitch_match::{DEFAULT_LOOKAHEAD, PitchMatcher};
pub use planner::{ChordAnchor, ScrollWindowPlanner, ViewMode, ViewportFrame, ViewportPlan};
