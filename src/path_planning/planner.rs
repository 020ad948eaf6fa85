//! Planner lifecycle, registry and post-processing
//!
//! Planners are created by name from a [`PlannerRegistry`]. After a planner
//! produced a path, [`PostProcessor`] hands it to the configured
//! post-processing planner with the same function bundle and an overlay of
//! the parameters.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::common::{LiveState, Planner, PlanningError, PlanningResult, StateSpace, Trajectory};
use crate::path_planning::callbacks::PlanCallbackRegistry;
use crate::path_planning::options::{PlannerStatusCode, PlanningOptions};
use crate::path_planning::parameters::PlannerParameters;
use crate::path_planning::rrt::RrtPlanner;
use crate::path_planning::shortcut::ShortcutPlanner;
use crate::path_planning::status::PlannerStatus;

/// Where a planner is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlannerState {
    #[default]
    NotStarted,
    Running,
    Succeeded,
    Failed,
    /// resumed by the next `plan_path`
    Interrupted,
    InterruptedWithSolution,
}

impl PlannerState {
    /// Terminal state matching a status code
    pub fn from_status(code: PlannerStatusCode) -> Self {
        if code.contains(PlannerStatusCode::INTERRUPTED_WITH_SOLUTION) {
            PlannerState::InterruptedWithSolution
        } else if code.contains(PlannerStatusCode::INTERRUPTED) {
            PlannerState::Interrupted
        } else if code.contains(PlannerStatusCode::HAS_SOLUTION) {
            PlannerState::Succeeded
        } else {
            PlannerState::Failed
        }
    }

    pub fn can_resume(self) -> bool {
        matches!(
            self,
            PlannerState::Interrupted | PlannerState::InterruptedWithSolution
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, PlannerState::Succeeded | PlannerState::Failed)
    }
}

type PlannerFactory = Box<dyn Fn() -> Box<dyn Planner>>;

/// Planner constructors by name
pub struct PlannerRegistry {
    factories: BTreeMap<String, PlannerFactory>,
}

impl PlannerRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the built-in `rrt` and `shortcut` planners
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(RrtPlanner::NAME, || Box::new(RrtPlanner::new()));
        registry.register(ShortcutPlanner::NAME, || Box::new(ShortcutPlanner::new()));
        registry
    }

    pub fn register(&mut self, name: &str, factory: impl Fn() -> Box<dyn Planner> + 'static) {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, name: &str) -> PlanningResult<Box<dyn Planner>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| PlanningError::UnknownPlanner(name.to_string()))
    }
}

impl Default for PlannerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for PlannerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// Runs the configured post-processing planner over a finished path
pub struct PostProcessor {
    registry: Rc<PlannerRegistry>,
    cached: Option<(String, Box<dyn Planner>)>,
}

impl PostProcessor {
    pub fn new(registry: Rc<PlannerRegistry>) -> Self {
        Self {
            registry,
            cached: None,
        }
    }

    pub fn registry(&self) -> &Rc<PlannerRegistry> {
        &self.registry
    }

    /// Fails with `UnknownPlanner` if the configured planner is not registered
    pub fn check_configured(&self, params: &PlannerParameters) -> PlanningResult<()> {
        let name = params.post_processing_planner.as_str();
        if name.is_empty() || self.registry.contains(name) {
            Ok(())
        } else {
            Err(PlanningError::UnknownPlanner(name.to_string()))
        }
    }

    /// Returns `None` when no post-processing planner is configured.
    ///
    /// The hook polls `callbacks` of the calling planner for the duration of
    /// the run. When it does not produce a solution `traj` is restored.
    pub fn run(
        &mut self,
        live: &mut LiveState,
        params: &PlannerParameters,
        traj: &mut Trajectory,
        options: PlanningOptions,
        callbacks: &Rc<PlanCallbackRegistry>,
    ) -> PlanningResult<Option<PlannerStatus>> {
        let name = params.post_processing_planner.clone();
        if name.is_empty() {
            return Ok(None);
        }
        let mut hook_params = params.apply_overlay(&params.post_processing_parameters)?;
        hook_params.post_processing_planner.clear();
        hook_params.post_processing_parameters.clear();

        let stale = self.cached.as_ref().map_or(true, |(cached, _)| *cached != name);
        if stale {
            let planner = self.registry.create(&name)?;
            self.cached = Some((name.clone(), planner));
        }
        let planner = match self.cached.as_mut() {
            Some((_, planner)) => planner,
            None => return Ok(None),
        };

        let parent = Rc::clone(callbacks);
        let _forward = planner
            .callbacks()
            .register(move |progress| parent.call_callbacks(progress));

        let backup = traj.clone();
        let init = planner.init_plan(live, &hook_params)?;
        if !init.has_solution() {
            warn!("post-processing planner `{}` rejected the parameters: {}", name, init.description);
            return Ok(Some(init));
        }
        let status = planner.plan_path(live, traj, options)?;
        if status.has_solution() {
            debug!(
                "post-processing `{}` went from {} to {} waypoints",
                name,
                backup.len(),
                traj.len()
            );
        } else {
            warn!("post-processing `{}` failed, keeping the original path: {}", name, status.description);
            *traj = backup;
        }
        Ok(Some(status))
    }
}

impl fmt::Debug for PostProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostProcessor")
            .field("registry", &self.registry)
            .field("cached", &self.cached.as_ref().map(|(name, _)| name))
            .finish()
    }
}

/// Sets each waypoint's time so no DOF exceeds its velocity limit on a
/// straight segment. DOFs with a non-positive limit are ignored.
pub fn retime_linear(traj: &mut Trajectory, space: &dyn StateSpace, velocity_limit: &[f64]) -> PlanningResult<()> {
    PlanningError::check_len("velocity limit", traj.dof(), velocity_limit.len())?;
    let mut previous: Option<Vec<f64>> = None;
    for waypoint in traj.waypoints_mut() {
        waypoint.delta_time = match &previous {
            None => 0.0,
            Some(prev) => {
                let mut delta = waypoint.values.clone();
                space.diff_state(&mut delta, prev);
                delta
                    .iter()
                    .zip(velocity_limit)
                    .filter(|(_, vmax)| **vmax > 0.0)
                    .map(|(d, vmax)| d.abs() / vmax)
                    .fold(0.0, f64::max)
            }
        };
        previous = Some(waypoint.values.clone());
    }
    info!("retimed {} waypoints to {:.3}s", traj.len(), traj.duration());
    Ok(())
}

/// Total metric length of a trajectory
pub fn path_length(traj: &Trajectory, space: &dyn StateSpace) -> f64 {
    traj.waypoints()
        .windows(2)
        .map(|w| space.distance(&w[0].values, &w[1].values))
        .sum()
}
