//! planner_core - control plane for sampling-based motion planners
//!
//! This crate provides the shared machinery planners are built from:
//! planner parameters, the pluggable function bundle, the constraint
//! filter pipeline, status reporting and the planner lifecycle, plus a
//! reference RRT planner and a shortcut post-processor.

// Core modules
pub mod common;
pub mod utils;

// Algorithm modules
pub mod path_planning;

// Re-export common types for convenience
pub use common::{LiveState, Trajectory, Waypoint, IntervalType, CollisionReport};
pub use common::{StateSpace, CollisionChecker, Planner, PathConstraintChecker};
pub use common::{PlanningError, PlanningResult};
pub use path_planning::{PlannerParameters, PlannerStatus, PlannerStatusCode, RrtPlanner, ShortcutPlanner};
