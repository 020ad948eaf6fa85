//! Bit masks and small enums shared by filters, neighbor functions and planners

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Selects which constraint classes a path check evaluates, and doubles as
    /// the result code of a check (0 means valid).
    ///
    /// The recommended mask sets the lower 16 bits only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ConstraintFilterOptions: u32 {
        const CHECK_ENV_COLLISIONS = 0x0000_0001;
        const CHECK_SELF_COLLISIONS = 0x0000_0002;
        /// velocity/acceleration dependent constraints, e.g. dynamics limits
        const CHECK_TIME_BASED_CONSTRAINTS = 0x0000_0004;
        /// report only the first violated class
        const BREAK_ON_FIRST_VALIDATION = 0x0000_0008;
        const CHECK_USER_CONSTRAINTS = 0x0000_8000;
        /// re-check collisions with each DOF jittered away from grazing contact
        const CHECK_WITH_PERTURBATION = 0x0001_0000;
        const FILL_CHECKED_CONFIGURATION = 0x0002_0000;
        const FILL_COLLISION_REPORT = 0x0004_0000;
        const FROM_PATH_SAMPLING = 0x0008_0000;
        const FROM_PATH_SHORTCUTTING = 0x0010_0000;
        const FROM_TRAJECTORY_SMOOTHER = 0x0020_0000;
        /// a close interpolation was computed but q1 itself was not reached
        const FINAL_VALUES_NOT_REACHED = 0x4000_0000;
        /// setting the state or projecting a neighbor failed
        const STATE_SETTING_ERROR = 0x8000_0000;

        const CHECK_COLLISIONS = Self::CHECK_ENV_COLLISIONS.bits() | Self::CHECK_SELF_COLLISIONS.bits();
        const RECOMMENDED = 0x0000_ffff;
    }
}

impl ConstraintFilterOptions {
    /// Bits that identify a failure cause in a result code
    pub const FAILURE_BITS: Self = Self::CHECK_ENV_COLLISIONS
        .union(Self::CHECK_SELF_COLLISIONS)
        .union(Self::CHECK_TIME_BASED_CONSTRAINTS)
        .union(Self::CHECK_USER_CONSTRAINTS)
        .union(Self::FINAL_VALUES_NOT_REACHED)
        .union(Self::STATE_SETTING_ERROR);

    /// Usage hints forwarded to the neighbor function
    pub fn neighbor_options(self) -> NeighborStateOptions {
        let mut options = NeighborStateOptions::empty();
        if self.contains(Self::FROM_PATH_SAMPLING) {
            options |= NeighborStateOptions::FROM_PATH_SAMPLING;
        }
        if self.contains(Self::FROM_PATH_SHORTCUTTING) {
            options |= NeighborStateOptions::FROM_PATH_SHORTCUTTING;
        }
        if self.contains(Self::FROM_TRAJECTORY_SMOOTHER) {
            options |= NeighborStateOptions::FROM_TRAJECTORY_SMOOTHER;
        }
        options
    }

    pub fn has_usage_hint(self) -> bool {
        self.intersects(
            Self::FROM_PATH_SAMPLING | Self::FROM_PATH_SHORTCUTTING | Self::FROM_TRAJECTORY_SMOOTHER,
        )
    }
}

bitflags! {
    /// Options for a neighbor-state extension `q := Filter(q + qdelta)`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct NeighborStateOptions: u32 {
        /// q is coming from a goal state, otherwise from an initial state
        const GOAL_TO_INITIAL = 1;
        /// stay as close as possible to q + qdelta, only correct hard constraint violations
        const ONLY_HARD_CONSTRAINTS = 2;
        /// keep tighter constraints and treat q + qdelta as a hint
        const FROM_PATH_SAMPLING = 4;
        /// keep q + qdelta unless the tighter constraints fail
        const FROM_PATH_SHORTCUTTING = 8;
        /// keep q + qdelta unless the smoother's constraints fail
        const FROM_TRAJECTORY_SMOOTHER = 16;
    }
}

/// Outcome of a neighbor-state extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeighborStateStatus {
    /// no valid filtered state exists
    Failed = 0,
    /// the returned state is exactly q + qdelta
    Reached = 1,
    /// the returned state is a constraint-projected point different from q + qdelta
    SuccessfulWithDeviation = 3,
}

impl NeighborStateStatus {
    pub fn is_success(self) -> bool {
        !matches!(self, NeighborStateStatus::Failed)
    }
}

bitflags! {
    /// Planner status code: a terminal class OR'd with failure causes.
    ///
    /// The empty value is a plain failure.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PlannerStatusCode: u32 {
        const HAS_SOLUTION = 1;
        /// interrupted, can be resumed by calling plan_path again
        const INTERRUPTED = 2;
        const INTERRUPTED_WITH_SOLUTION = 3;
        const FAILED_DUE_TO_ENV_COLLISION = 0x0001_0000;
        const FAILED_DUE_TO_SELF_COLLISION = 0x0002_0000;
        const FAILED_DUE_TO_COLLISION = 0x0003_0000;
        const FAILED_DUE_TO_INITIAL = 0x0004_0000;
        const FAILED_DUE_TO_GOAL = 0x0008_0000;
        const FAILED_DUE_TO_KINEMATICS = 0x0010_0000;
        /// inverse kinematics failed, could be collisions or velocity constraints
        const FAILED_DUE_TO_IK = 0x0020_0000;
        const FAILED_DUE_TO_VELOCITY_CONSTRAINTS = 0x0040_0000;
        const FAILED_DUE_TO_CUSTOM_FILTER = 0x0080_0000;
        /// e.g. torque limits
        const FAILED_DUE_TO_TIME_BASED_CONSTRAINTS = 0x0100_0000;
    }
}

impl PlannerStatusCode {
    pub const CAUSES: Self = Self::FAILED_DUE_TO_COLLISION
        .union(Self::FAILED_DUE_TO_INITIAL)
        .union(Self::FAILED_DUE_TO_GOAL)
        .union(Self::FAILED_DUE_TO_KINEMATICS)
        .union(Self::FAILED_DUE_TO_IK)
        .union(Self::FAILED_DUE_TO_VELOCITY_CONSTRAINTS)
        .union(Self::FAILED_DUE_TO_CUSTOM_FILTER)
        .union(Self::FAILED_DUE_TO_TIME_BASED_CONSTRAINTS);

    pub fn causes(self) -> Self {
        self & Self::CAUSES
    }

    /// Maps a filter result code onto status cause bits
    pub fn from_filter_code(code: ConstraintFilterOptions) -> Self {
        let mut causes = Self::empty();
        if code.contains(ConstraintFilterOptions::CHECK_ENV_COLLISIONS) {
            causes |= Self::FAILED_DUE_TO_ENV_COLLISION;
        }
        if code.contains(ConstraintFilterOptions::CHECK_SELF_COLLISIONS) {
            causes |= Self::FAILED_DUE_TO_SELF_COLLISION;
        }
        if code.contains(ConstraintFilterOptions::CHECK_TIME_BASED_CONSTRAINTS) {
            causes |= Self::FAILED_DUE_TO_TIME_BASED_CONSTRAINTS;
        }
        if code.contains(ConstraintFilterOptions::CHECK_USER_CONSTRAINTS) {
            causes |= Self::FAILED_DUE_TO_CUSTOM_FILTER;
        }
        if code.intersects(
            ConstraintFilterOptions::STATE_SETTING_ERROR
                | ConstraintFilterOptions::FINAL_VALUES_NOT_REACHED,
        ) {
            causes |= Self::FAILED_DUE_TO_KINEMATICS;
        }
        causes
    }
}

bitflags! {
    /// Options for `Planner::plan_path`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PlanningOptions: u32 {
        /// only fill the status code, skip descriptions and reports
        const NO_STATUS_DETAIL = 1;
        /// collect collision reports and per-link counters, slower
        const ADD_COLLISION_STATISTICS = 2;
    }
}

/// Action returned by a plan callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlannerAction {
    #[default]
    None,
    /// stop and return to the caller with the current status
    Interrupt,
    /// stop refining and return the first feasible solution
    ReturnWithAnySolution,
}
