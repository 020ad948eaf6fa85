//! Capability traits that define a configuration space and the planners built on it
//!
//! Each trait is one pluggable operation of the planning function bundle.
//! Implementations close over a robot or environment without owning it; the
//! live state is always passed in explicitly.

use std::rc::Rc;

use nalgebra::DVector;
use rand::rngs::StdRng;

use crate::common::error::PlanningResult;
use crate::common::types::*;
use crate::path_planning::callbacks::PlanCallbackRegistry;
use crate::path_planning::constraint_filter::{ConstraintFilterReturn, Segment};
use crate::path_planning::options::*;
use crate::path_planning::parameters::PlannerParameters;
use crate::path_planning::status::PlannerStatus;

/// Random generator owned by a planning session
pub type PlannerRng = StdRng;

/// Reads, writes and measures configurations
pub trait StateSpace {
    /// Dimension of the configuration space
    fn dof(&self) -> usize;

    /// Reads the configuration currently set on the live state
    fn get_state(&self, live: &LiveState, out: &mut Vec<f64>);

    /// Writes a configuration onto the live state
    fn set_state(&self, live: &mut LiveState, values: &[f64]) -> PlanningResult<()>;

    /// `q1 -= q2`, respecting circular dimensions
    fn diff_state(&self, q1: &mut [f64], q2: &[f64]) {
        for (a, b) in q1.iter_mut().zip(q2) {
            *a -= b;
        }
    }

    /// `q += delta`, respecting circular dimensions
    fn add_state(&self, q: &mut [f64], delta: &[f64]) {
        for (a, d) in q.iter_mut().zip(delta) {
            *a += d;
        }
    }

    /// Distance metric; two configurations are the same when it returns 0
    fn distance(&self, q0: &[f64], q1: &[f64]) -> f64 {
        let mut delta = q1.to_vec();
        self.diff_state(&mut delta, q0);
        DVector::from_vec(delta).norm()
    }
}

/// Samples the configuration space
pub trait Sampler {
    /// Uniform sample over the whole space
    fn sample(&self, rng: &mut PlannerRng, out: &mut Vec<f64>) -> bool;

    /// Sample within `radius` of `near`
    fn sample_neighbor(
        &self,
        rng: &mut PlannerRng,
        out: &mut Vec<f64>,
        near: &[f64],
        radius: f64,
    ) -> bool;
}

/// Samples a valid goal or initial configuration
pub trait ConfigSampler {
    fn sample(&self, rng: &mut PlannerRng, out: &mut Vec<f64>) -> bool;
}

/// Cost of being in a state
pub trait CostFunction {
    fn cost(&self, q: &[f64]) -> f64;
}

impl<F: Fn(&[f64]) -> f64> CostFunction for F {
    fn cost(&self, q: &[f64]) -> f64 {
        self(q)
    }
}

/// Distance to the closest goal; the goal is reached at 0
pub trait GoalDistance {
    fn goal_distance(&self, q: &[f64]) -> f64;
}

impl<F: Fn(&[f64]) -> f64> GoalDistance for F {
    fn goal_distance(&self, q: &[f64]) -> f64 {
        self(q)
    }
}

/// Collision collaborator. Returns `Ok(true)` when in collision.
pub trait CollisionChecker {
    fn check_env_collision(
        &self,
        live: &LiveState,
        report: Option<&mut CollisionReport>,
    ) -> PlanningResult<bool>;

    fn check_self_collision(
        &self,
        _live: &LiveState,
        _report: Option<&mut CollisionReport>,
    ) -> PlanningResult<bool> {
        Ok(false)
    }
}

/// Verdict of a per-sample constraint
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintVerdict {
    Valid,
    /// `surpass_multiplier` is the time-scaling factor that would bring the
    /// sample back inside its limits, when the constraint can compute one
    Violated { surpass_multiplier: Option<f64> },
}

/// Time-based or user-defined constraint evaluated at every filter sample
pub trait SampleConstraint {
    fn check(&self, live: &LiveState, sample: &FilterSample<'_>) -> PlanningResult<ConstraintVerdict>;
}

/// Projection of a configuration onto a constraint manifold
pub trait ManifoldProjection {
    fn is_satisfied(&self, q: &[f64]) -> bool;

    /// Projects in place; returns false if no projection exists
    fn project(&self, q: &mut [f64], options: NeighborStateOptions) -> bool;
}

/// Neighbor extension `q := Filter(q + qdelta)`.
///
/// `q` is assumed to be the configuration already set on `live`.
pub trait NeighborStateFn {
    fn neighbor(
        &self,
        live: &mut LiveState,
        q: &mut Vec<f64>,
        qdelta: &[f64],
        options: NeighborStateOptions,
    ) -> PlanningResult<NeighborStateStatus>;
}

/// Validates a path segment against the constraint classes selected in `options`.
///
/// Returns the empty code when the segment is valid. Ordinary violations are
/// encoded in the code, never returned as `Err`.
pub trait PathConstraintChecker {
    fn check_segment(
        &self,
        live: &mut LiveState,
        segment: &Segment<'_>,
        interval: IntervalType,
        options: ConstraintFilterOptions,
        out: Option<&mut ConstraintFilterReturn>,
    ) -> PlanningResult<ConstraintFilterOptions>;
}

/// Planner interface. Not safe for concurrent use.
pub trait Planner {
    fn name(&self) -> &str;

    /// Copies the parameters, resets all internal structures and checks the
    /// initial and goal conditions
    fn init_plan(
        &mut self,
        live: &mut LiveState,
        params: &PlannerParameters,
    ) -> PlanningResult<PlannerStatus>;

    /// Runs (or resumes) planning and fills `traj` on success
    fn plan_path(
        &mut self,
        live: &mut LiveState,
        traj: &mut Trajectory,
        options: PlanningOptions,
    ) -> PlanningResult<PlannerStatus>;

    fn parameters(&self) -> Option<&Rc<PlannerParameters>>;

    /// Registry of callbacks polled once per planning iteration
    fn callbacks(&self) -> &PlanCallbackRegistry;
}
