//! Daily window arithmetic and randomized target planning
//!
//! Pure time logic with no device or task dependencies. [`SyncWindow`]
//! answers "should we act right now" against the configured daily window;
//! [`TargetGenerator`] draws the randomized clock values written during the
//! active phase; [`IntervalPlanner`] paces the writes with jittered sleeps.
//!
//! Everything here takes `now` as a parameter rather than reading the host
//! clock, so behavior at boundaries is directly testable.

mod random;
mod window;

pub use random::{GeneratorStats, IntervalPlanner, PlannerStats, TargetGenerator};
pub use window::{SyncWindow, WindowPhase};
