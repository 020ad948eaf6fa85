//! Planning function bundle
//!
//! The capability set a planner works through: state access, sampling,
//! metrics, neighbor extension and path validation. Slots are bound once per
//! session and shared by cloning the bundle. Optional slots fall back to a
//! default; a missing mandatory slot is a [`PlanningError::MissingFunction`].

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::common::{
    ConfigSampler, CostFunction, GoalDistance, IntervalType, LiveState, NeighborStateFn,
    PathConstraintChecker, PlannerRng, PlanningError, PlanningResult, Sampler, StateSpace,
};
use crate::path_planning::constraint_filter::{ConstraintFilterReturn, Segment};
use crate::path_planning::options::{ConstraintFilterOptions, NeighborStateOptions, NeighborStateStatus};

#[derive(Clone, Default)]
pub struct FunctionBundle {
    pub state_space: Option<Rc<dyn StateSpace>>,
    pub sampler: Option<Rc<dyn Sampler>>,
    pub sample_goal: Option<Rc<dyn ConfigSampler>>,
    pub sample_initial: Option<Rc<dyn ConfigSampler>>,
    pub neighbor_state: Option<Rc<dyn NeighborStateFn>>,
    /// the only path validation slot; the position-only check wraps it
    pub path_constraints: Option<Rc<dyn PathConstraintChecker>>,
    pub cost: Option<Rc<dyn CostFunction>>,
    pub goal_distance: Option<Rc<dyn GoalDistance>>,
}

impl FunctionBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn space(&self) -> PlanningResult<&Rc<dyn StateSpace>> {
        self.state_space
            .as_ref()
            .ok_or(PlanningError::MissingFunction("state_space"))
    }

    pub fn dof(&self) -> PlanningResult<usize> {
        Ok(self.space()?.dof())
    }

    pub fn get_state(&self, live: &LiveState, out: &mut Vec<f64>) -> PlanningResult<()> {
        self.space()?.get_state(live, out);
        Ok(())
    }

    pub fn set_state(&self, live: &mut LiveState, values: &[f64]) -> PlanningResult<()> {
        let space = self.space()?;
        PlanningError::check_len("state", space.dof(), values.len())?;
        space.set_state(live, values)
    }

    /// `q1 -= q2`
    pub fn diff_state(&self, q1: &mut [f64], q2: &[f64]) -> PlanningResult<()> {
        self.space()?.diff_state(q1, q2);
        Ok(())
    }

    /// `q += delta`
    pub fn add_state(&self, q: &mut [f64], delta: &[f64]) -> PlanningResult<()> {
        self.space()?.add_state(q, delta);
        Ok(())
    }

    pub fn distance(&self, q0: &[f64], q1: &[f64]) -> PlanningResult<f64> {
        Ok(self.space()?.distance(q0, q1))
    }

    pub fn sample(&self, rng: &mut PlannerRng, out: &mut Vec<f64>) -> PlanningResult<bool> {
        let sampler = self.sampler.as_ref().ok_or(PlanningError::MissingFunction("sampler"))?;
        Ok(sampler.sample(rng, out))
    }

    pub fn sample_neighbor(
        &self,
        rng: &mut PlannerRng,
        out: &mut Vec<f64>,
        near: &[f64],
        radius: f64,
    ) -> PlanningResult<bool> {
        let sampler = self.sampler.as_ref().ok_or(PlanningError::MissingFunction("sampler"))?;
        Ok(sampler.sample_neighbor(rng, out, near, radius))
    }

    /// Returns false when no goal sampler is bound or it fails
    pub fn sample_goal(&self, rng: &mut PlannerRng, out: &mut Vec<f64>) -> bool {
        self.sample_goal.as_ref().map_or(false, |s| s.sample(rng, out))
    }

    /// Returns false when no initial sampler is bound or it fails
    pub fn sample_initial(&self, rng: &mut PlannerRng, out: &mut Vec<f64>) -> bool {
        self.sample_initial.as_ref().map_or(false, |s| s.sample(rng, out))
    }

    /// Cost of a state, 0 when no cost function is bound
    pub fn cost(&self, q: &[f64]) -> f64 {
        self.cost.as_ref().map_or(0.0, |c| c.cost(q))
    }

    pub fn goal_distance(&self, q: &[f64]) -> Option<f64> {
        self.goal_distance.as_ref().map(|g| g.goal_distance(q))
    }

    /// Extends `q` by `qdelta`. Without a bound neighbor function the state is
    /// added and set as is.
    pub fn neighbor_state(
        &self,
        live: &mut LiveState,
        q: &mut Vec<f64>,
        qdelta: &[f64],
        options: NeighborStateOptions,
    ) -> PlanningResult<NeighborStateStatus> {
        if let Some(neighbor) = &self.neighbor_state {
            return neighbor.neighbor(live, q, qdelta, options);
        }
        let space = self.space()?;
        PlanningError::check_len("qdelta", space.dof(), qdelta.len())?;
        if qdelta.iter().all(|d| *d == 0.0) {
            return Ok(NeighborStateStatus::Reached);
        }
        let mut next = q.clone();
        space.add_state(&mut next, qdelta);
        match space.set_state(live, &next) {
            Ok(()) => {
                *q = next;
                Ok(NeighborStateStatus::Reached)
            }
            Err(PlanningError::StateSetting(_)) => Ok(NeighborStateStatus::Failed),
            Err(e) => Err(e),
        }
    }

    /// Validates a segment. An unbound checker accepts every segment.
    pub fn check_segment(
        &self,
        live: &mut LiveState,
        segment: &Segment<'_>,
        interval: IntervalType,
        options: ConstraintFilterOptions,
        mut out: Option<&mut ConstraintFilterReturn>,
    ) -> PlanningResult<ConstraintFilterOptions> {
        match &self.path_constraints {
            Some(checker) => checker.check_segment(live, segment, interval, options, out),
            None => {
                if let Some(out) = out.as_deref_mut() {
                    out.clear();
                }
                Ok(ConstraintFilterOptions::empty())
            }
        }
    }

    /// Velocity-aware path check
    #[allow(clippy::too_many_arguments)]
    pub fn check_path_all_constraints(
        &self,
        live: &mut LiveState,
        q0: &[f64],
        q1: &[f64],
        dq0: &[f64],
        dq1: &[f64],
        elapsed_time: f64,
        interval: IntervalType,
        options: ConstraintFilterOptions,
        out: Option<&mut ConstraintFilterReturn>,
    ) -> PlanningResult<ConstraintFilterOptions> {
        let segment = Segment::new(q0, q1, dq0, dq1, elapsed_time);
        self.check_segment(live, &segment, interval, options, out)
    }

    /// Position-only path check.
    ///
    /// Runs the velocity-aware check with zero velocities and the recommended
    /// mask. When `configurations` is given it receives the checked samples.
    pub fn check_path_constraints(
        &self,
        live: &mut LiveState,
        q0: &[f64],
        q1: &[f64],
        interval: IntervalType,
        configurations: Option<&mut Vec<Vec<f64>>>,
    ) -> PlanningResult<bool> {
        let dof = self.dof()?;
        let zero = vec![0.0; dof];
        let mut options = ConstraintFilterOptions::RECOMMENDED;
        let mut filter_return = ConstraintFilterReturn::new();
        if configurations.is_some() {
            options |= ConstraintFilterOptions::FILL_CHECKED_CONFIGURATION;
        }
        let code = self.check_path_all_constraints(
            live,
            q0,
            q1,
            &zero,
            &zero,
            0.0,
            interval,
            options,
            Some(&mut filter_return),
        )?;
        if let Some(configurations) = configurations {
            configurations.clear();
            configurations.extend(filter_return.configurations(dof).map(<[f64]>::to_vec));
        }
        Ok(code.is_empty())
    }

    /// Checks every bound slot against the expected dimension
    pub fn validate(&self, dof: usize) -> PlanningResult<()> {
        PlanningError::check_len("state space", dof, self.dof()?)
    }
}

impl fmt::Debug for FunctionBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionBundle")
            .field("state_space", &self.state_space.is_some())
            .field("sampler", &self.sampler.is_some())
            .field("sample_goal", &self.sample_goal.is_some())
            .field("sample_initial", &self.sample_initial.is_some())
            .field("neighbor_state", &self.neighbor_state.is_some())
            .field("path_constraints", &self.path_constraints.is_some())
            .field("cost", &self.cost.is_some())
            .field("goal_distance", &self.goal_distance.is_some())
            .finish()
    }
}

/// Saves the live state and restores it when dropped
pub struct StateSaver<'a> {
    live: &'a mut LiveState,
    saved: LiveState,
}

impl<'a> StateSaver<'a> {
    pub fn new(live: &'a mut LiveState) -> Self {
        let saved = live.clone();
        Self { live, saved }
    }

    pub fn saved(&self) -> &LiveState {
        &self.saved
    }
}

impl Deref for StateSaver<'_> {
    type Target = LiveState;

    fn deref(&self) -> &LiveState {
        self.live
    }
}

impl DerefMut for StateSaver<'_> {
    fn deref_mut(&mut self) -> &mut LiveState {
        self.live
    }
}

impl Drop for StateSaver<'_> {
    fn drop(&mut self) {
        self.live.restore_from(&self.saved);
    }
}
