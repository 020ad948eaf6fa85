//! RRT (Rapidly-exploring Random Tree) path planning algorithm
//!
//! Single-tree, goal-biased RRT over the planning function bundle. Samples
//! come from the bundle's sampler, extension goes through the neighbor
//! function and every new edge is validated by the path constraint checker.
//! The search is resumable: an interrupt keeps the tree and the random
//! generator, and the next `plan_path` continues where it stopped.

use std::rc::Rc;
use std::time::{Duration, Instant};

use ordered_float::NotNan;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::{
    IntervalType, LiveState, Planner, PlannerRng, PlanningError, PlanningResult, Trajectory,
};
use crate::path_planning::callbacks::{PlanCallbackRegistry, PlannerProgress};
use crate::path_planning::constraint_filter::{ConstraintFilterReturn, Segment};
use crate::path_planning::options::*;
use crate::path_planning::parameters::{ParameterExtension, PlannerParameters};
use crate::path_planning::planner::{retime_linear, PlannerRegistry, PlannerState, PostProcessor};
use crate::path_planning::status::PlannerStatus;
use crate::planner_status;

/// RRT specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RrtExtension {
    /// Goal sampling rate (0-100)
    pub goal_sample_rate: u32,
    /// Iteration cap used when the parameters leave it at 0
    pub default_max_iterations: u32,
}

impl Default for RrtExtension {
    fn default() -> Self {
        Self {
            goal_sample_rate: 5,
            default_max_iterations: 5000,
        }
    }
}

impl ParameterExtension for RrtExtension {
    const NAME: &'static str = "rrt";
}

/// Internal node for RRT tree
#[derive(Debug, Clone)]
pub struct RrtNode {
    pub config: Vec<f64>,
    pub parent: Option<usize>,
}

impl RrtNode {
    pub fn new(config: Vec<f64>, parent: Option<usize>) -> Self {
        RrtNode { config, parent }
    }
}

/// RRT path planner
pub struct RrtPlanner {
    params: Option<Rc<PlannerParameters>>,
    config: RrtExtension,
    callbacks: Rc<PlanCallbackRegistry>,
    post_processor: PostProcessor,
    rng: PlannerRng,
    node_list: Vec<RrtNode>,
    goals: Vec<Vec<f64>>,
    /// status of a failed `init_plan`
    init_failure: Option<PlannerStatus>,
    state: PlannerState,
    iteration: u32,
    elapsed: Duration,
    /// failure causes and collision counters gathered while searching
    diagnostics: PlannerStatus,
}

impl RrtPlanner {
    pub const NAME: &'static str = "rrt";

    pub fn new() -> Self {
        Self::with_registry(Rc::new(PlannerRegistry::with_defaults()))
    }

    /// Planner resolving post-processing planners through `registry`
    pub fn with_registry(registry: Rc<PlannerRegistry>) -> Self {
        RrtPlanner {
            params: None,
            config: RrtExtension::default(),
            callbacks: Rc::new(PlanCallbackRegistry::new()),
            post_processor: PostProcessor::new(registry),
            rng: StdRng::seed_from_u64(0),
            node_list: Vec::new(),
            goals: Vec::new(),
            init_failure: None,
            state: PlannerState::NotStarted,
            iteration: 0,
            elapsed: Duration::ZERO,
            diagnostics: PlannerStatus::default(),
        }
    }

    /// Get the tree built during planning
    pub fn get_tree(&self) -> &[RrtNode] {
        &self.node_list
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    fn params(&self) -> PlanningResult<Rc<PlannerParameters>> {
        self.params
            .clone()
            .ok_or_else(|| PlanningError::invalid_parameter("init_plan must be called before plan_path"))
    }

    fn within_limits(params: &PlannerParameters, q: &[f64]) -> bool {
        q.iter()
            .zip(params.lower_limit.iter().zip(&params.upper_limit))
            .all(|(v, (lo, hi))| v >= lo && v <= hi)
    }

    /// Checks a single configuration with every constraint class
    fn check_configuration(
        params: &PlannerParameters,
        live: &mut LiveState,
        q: &[f64],
        filter_return: &mut ConstraintFilterReturn,
    ) -> PlanningResult<ConstraintFilterOptions> {
        let zero = vec![0.0; q.len()];
        params.functions.check_path_all_constraints(
            live,
            q,
            q,
            &zero,
            &zero,
            0.0,
            IntervalType::Closed,
            ConstraintFilterOptions::RECOMMENDED | ConstraintFilterOptions::FILL_COLLISION_REPORT,
            Some(filter_return),
        )
    }

    /// Seeds the generator and rebuilds the tree from the valid initial
    /// configurations
    fn reset_search(&mut self, live: &mut LiveState) -> PlanningResult<Option<PlannerStatus>> {
        let params = self.params()?;
        self.rng = StdRng::seed_from_u64(u64::from(params.random_seed));
        self.node_list.clear();
        self.goals.clear();
        self.iteration = 0;
        self.elapsed = Duration::ZERO;
        self.diagnostics = PlannerStatus::default();
        let mut filter_return = ConstraintFilterReturn::new();

        let mut initial_causes = PlannerStatusCode::empty();
        for q in params.initial_configs() {
            if !Self::within_limits(&params, q) {
                initial_causes |= PlannerStatusCode::FAILED_DUE_TO_INITIAL;
                continue;
            }
            let code = Self::check_configuration(&params, live, q, &mut filter_return)?;
            if code.is_empty() {
                self.node_list.push(RrtNode::new(q.to_vec(), None));
            } else {
                initial_causes |= PlannerStatusCode::FAILED_DUE_TO_INITIAL | PlannerStatusCode::from_filter_code(code);
                if let Some(report) = filter_return.report.take() {
                    self.diagnostics.init_collision_report(report);
                }
            }
        }
        if self.node_list.is_empty() {
            let mut status = planner_status!(
                "no initial configuration is valid",
                PlannerStatusCode::FAILED_DUE_TO_INITIAL | initial_causes
            )
            .with_joint_values(params.initial_configs().next().map(<[f64]>::to_vec).unwrap_or_default())
            .with_parameters(self.params.clone());
            status.report = self.diagnostics.report.take();
            status.colliding_links_count = std::mem::take(&mut self.diagnostics.colliding_links_count);
            return Ok(Some(status));
        }

        let mut goal_causes = PlannerStatusCode::empty();
        for q in params.goal_configs() {
            if !Self::within_limits(&params, q) {
                debug!("goal {:?} is outside the limits", q);
                goal_causes |= PlannerStatusCode::FAILED_DUE_TO_GOAL;
                continue;
            }
            let code = Self::check_configuration(&params, live, q, &mut filter_return)?;
            if code.is_empty() {
                self.goals.push(q.to_vec());
            } else {
                goal_causes |= PlannerStatusCode::FAILED_DUE_TO_GOAL | PlannerStatusCode::from_filter_code(code);
            }
        }
        if self.goals.is_empty() {
            return Ok(Some(
                planner_status!(
                    "no goal configuration is valid",
                    PlannerStatusCode::FAILED_DUE_TO_GOAL | goal_causes
                )
                .with_joint_values(params.goal_configs().next().map(<[f64]>::to_vec).unwrap_or_default())
                .with_parameters(self.params.clone()),
            ));
        }

        params.functions.set_state(live, &self.node_list[0].config)?;
        Ok(None)
    }

    fn get_random_config(&mut self, params: &PlannerParameters, out: &mut Vec<f64>) -> PlanningResult<bool> {
        if self.rng.gen_range(0..100) < self.config.goal_sample_rate {
            let goal = &self.goals[self.rng.gen_range(0..self.goals.len())];
            out.clear();
            out.extend_from_slice(goal);
            Ok(true)
        } else {
            params.functions.sample(&mut self.rng, out)
        }
    }

    fn get_nearest_node_index(&self, params: &PlannerParameters, q: &[f64]) -> PlanningResult<Option<usize>> {
        let space = params.functions.space()?;
        Ok(self
            .node_list
            .iter()
            .enumerate()
            .filter_map(|(i, node)| NotNan::new(space.distance(&node.config, q)).ok().map(|d| (d, i)))
            .min()
            .map(|(_, i)| i))
    }

    fn record_failure(&mut self, code: ConstraintFilterOptions, filter_return: &mut ConstraintFilterReturn) {
        self.diagnostics.status_code |= PlannerStatusCode::from_filter_code(code);
        if let Some(report) = filter_return.report.take() {
            self.diagnostics.add_collision_report(&report);
            self.diagnostics.report = Some(report);
        }
    }

    fn generate_final_course(&self, goal_ind: usize) -> Vec<Vec<f64>> {
        let mut path = Vec::new();
        let mut node_index = Some(goal_ind);
        while let Some(index) = node_index {
            let node = &self.node_list[index];
            path.push(node.config.clone());
            node_index = node.parent;
        }
        path.reverse();
        path
    }

    /// One extension step; returns the index of the goal node once connected
    fn extend(
        &mut self,
        params: &PlannerParameters,
        live: &mut LiveState,
        filter_options: ConstraintFilterOptions,
        filter_return: &mut ConstraintFilterReturn,
    ) -> PlanningResult<Option<usize>> {
        let funcs = &params.functions;
        let step = params.effective_step_length();
        let mut q_rand = Vec::new();
        if !self.get_random_config(params, &mut q_rand)? {
            return Ok(None);
        }
        let nearest_ind = match self.get_nearest_node_index(params, &q_rand)? {
            Some(index) => index,
            None => return Ok(None),
        };
        let nearest = self.node_list[nearest_ind].config.clone();

        let dist = funcs.distance(&nearest, &q_rand)?;
        if dist <= 0.0 {
            return Ok(None);
        }
        let mut delta = q_rand;
        funcs.diff_state(&mut delta, &nearest)?;
        let scale = (step / dist).min(1.0);
        delta.iter_mut().for_each(|d| *d *= scale);

        let mut q_new = nearest.clone();
        funcs.set_state(live, &q_new)?;
        let status = funcs.neighbor_state(live, &mut q_new, &delta, NeighborStateOptions::FROM_PATH_SAMPLING)?;
        if status == NeighborStateStatus::Failed {
            self.diagnostics.status_code |= PlannerStatusCode::FAILED_DUE_TO_KINEMATICS;
            return Ok(None);
        }
        if funcs.distance(&nearest, &q_new)? <= 0.0 {
            return Ok(None);
        }

        let zero = vec![0.0; q_new.len()];
        let code = funcs.check_path_all_constraints(
            live,
            &nearest,
            &q_new,
            &zero,
            &zero,
            0.0,
            IntervalType::OpenStart,
            filter_options,
            Some(filter_return),
        )?;
        if !code.is_empty() {
            self.record_failure(code, filter_return);
            return Ok(None);
        }
        self.node_list.push(RrtNode::new(q_new.clone(), Some(nearest_ind)));
        let new_ind = self.node_list.len() - 1;

        for goal_index in 0..self.goals.len() {
            let goal = self.goals[goal_index].clone();
            if funcs.distance(&q_new, &goal)? > step {
                continue;
            }
            let segment = Segment::new(&q_new, &goal, &zero, &zero, 0.0);
            let code = funcs.check_segment(live, &segment, IntervalType::OpenStart, filter_options, Some(filter_return))?;
            if code.is_empty() {
                self.node_list.push(RrtNode::new(goal, Some(new_ind)));
                return Ok(Some(self.node_list.len() - 1));
            }
            self.record_failure(code, filter_return);
        }
        Ok(None)
    }

    /// Attaches progress, parameters and the accumulated diagnostics
    fn finish(&mut self, mut status: PlannerStatus, started: Instant, options: PlanningOptions) -> PlannerStatus {
        self.elapsed += started.elapsed();
        self.state = PlannerState::from_status(status.status_code);
        status = status
            .with_progress(self.iteration, self.elapsed)
            .with_parameters(self.params.clone());
        if !status.has_solution() && !status.is_interrupted() {
            status.status_code |= self.diagnostics.status_code.causes();
            if status.report.is_none() {
                status.report = self.diagnostics.report.clone();
            }
        }
        if options.contains(PlanningOptions::ADD_COLLISION_STATISTICS) {
            for (key, count) in &self.diagnostics.colliding_links_count {
                *status.colliding_links_count.entry(key.clone()).or_insert(0) += count;
            }
        }
        if options.contains(PlanningOptions::NO_STATUS_DETAIL) {
            status.strip_detail();
        }
        status
    }
}

impl Default for RrtPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner for RrtPlanner {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn init_plan(&mut self, live: &mut LiveState, params: &PlannerParameters) -> PlanningResult<PlannerStatus> {
        params.validate()?;
        params.functions.space()?;
        if params.initial_config.is_empty() {
            return Err(PlanningError::invalid_parameter("rrt needs an initial configuration"));
        }
        if params.goal_config.is_empty() {
            return Err(PlanningError::invalid_parameter("rrt needs a goal configuration"));
        }
        self.post_processor.check_configured(params)?;
        self.config = params.extension_or_default::<RrtExtension>()?;
        self.params = Some(Rc::new(params.clone()));
        self.state = PlannerState::NotStarted;
        self.init_failure = self.reset_search(live)?;

        match &self.init_failure {
            Some(status) => {
                info!("rrt init failed: {}", status.description);
                self.state = PlannerState::Failed;
                Ok(status.clone())
            }
            None => {
                debug!(
                    "rrt initialized with {} roots and {} goals",
                    self.node_list.len(),
                    self.goals.len()
                );
                Ok(planner_status!("rrt initialized", PlannerStatusCode::HAS_SOLUTION)
                    .with_parameters(self.params.clone()))
            }
        }
    }

    fn plan_path(
        &mut self,
        live: &mut LiveState,
        traj: &mut Trajectory,
        options: PlanningOptions,
    ) -> PlanningResult<PlannerStatus> {
        let params = self.params()?;
        if let Some(status) = &self.init_failure {
            return Ok(status.clone());
        }
        if self.state.is_finished() {
            if let Some(status) = self.reset_search(live)? {
                return Ok(status);
            }
        }
        let started = Instant::now();
        self.state = PlannerState::Running;

        let max_iterations = if params.max_iterations > 0 {
            params.max_iterations
        } else {
            self.config.default_max_iterations
        };
        let time_cap = (params.max_planning_time_ms > 0)
            .then(|| Duration::from_millis(u64::from(params.max_planning_time_ms)));
        let mut filter_options = ConstraintFilterOptions::RECOMMENDED;
        if options.contains(PlanningOptions::ADD_COLLISION_STATISTICS) {
            filter_options |= ConstraintFilterOptions::FILL_COLLISION_REPORT;
        }
        let mut filter_return = ConstraintFilterReturn::new();
        let mut return_first = false;

        while self.iteration < max_iterations {
            if let Some(cap) = time_cap {
                if started.elapsed() >= cap {
                    let status = planner_status!(
                        format!("rrt hit the {}ms time limit", params.max_planning_time_ms),
                        PlannerStatusCode::INTERRUPTED
                    );
                    return Ok(self.finish(status, started, options));
                }
            }
            match self.callbacks.call_callbacks(&PlannerProgress { iteration: self.iteration }) {
                PlannerAction::None => {}
                PlannerAction::ReturnWithAnySolution => {
                    if !return_first {
                        debug!("rrt will return its first path (iteration {})", self.iteration);
                    }
                    return_first = true;
                }
                PlannerAction::Interrupt => {
                    debug!("rrt stopped by callback at iteration {}", self.iteration);
                    let status = planner_status!("rrt interrupted by callback", PlannerStatusCode::INTERRUPTED);
                    return Ok(self.finish(status, started, options));
                }
            }
            self.iteration += 1;

            if let Some(goal_ind) = self.extend(&params, live, filter_options, &mut filter_return)? {
                let path = self.generate_final_course(goal_ind);
                traj.reset(params.dof());
                for q in &path {
                    traj.push(q)?;
                }
                info!(
                    "rrt found a path with {} waypoints after {} iterations ({} nodes)",
                    traj.len(),
                    self.iteration,
                    self.node_list.len()
                );
                let mut status = planner_status!("rrt found a path", PlannerStatusCode::HAS_SOLUTION);
                if return_first {
                    debug!("skipping post-processing, the first path was requested");
                } else if let Some(hook) = self.post_processor.run(live, &params, traj, options, &self.callbacks)? {
                    status.merge_post_processing(&hook);
                }
                if !params.velocity_limit.is_empty() {
                    retime_linear(traj, params.functions.space()?.as_ref(), &params.velocity_limit)?;
                }
                return Ok(self.finish(status, started, options));
            }
        }

        let status = planner_status!(
            format!("rrt found no path within {} iterations", max_iterations),
            PlannerStatusCode::empty()
        );
        Ok(self.finish(status, started, options))
    }

    fn parameters(&self) -> Option<&Rc<PlannerParameters>> {
        self.params.as_ref()
    }

    fn callbacks(&self) -> &PlanCallbackRegistry {
        &self.callbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{CollisionChecker, CollisionReport};
    use crate::path_planning::configuration::{ConfigurationSpecification, JointInfo, RobotModel};

    /// Disk of radius 0.5 centered at (0.5, 0.5)
    struct Disk;

    impl CollisionChecker for Disk {
        fn check_env_collision(&self, live: &LiveState, _report: Option<&mut CollisionReport>) -> PlanningResult<bool> {
            let (x, y) = (live.joint_values[0], live.joint_values[1]);
            Ok((x - 0.5).powi(2) + (y - 0.5).powi(2) < 0.25)
        }
    }

    fn setup(goal: Vec<f64>) -> (PlannerParameters, LiveState) {
        let robot = RobotModel::new("planar")
            .with_joint(JointInfo::new("x", 0.0, 1.0).with_resolution(0.01))
            .with_joint(JointInfo::new("y", 0.0, 1.0).with_resolution(0.01))
            .with_collision_checker(Rc::new(Disk));
        let live = robot.live_state();
        let mut params = PlannerParameters::new();
        params
            .set_configuration_specification(&robot, ConfigurationSpecification::joint_values([0, 1]), &live)
            .unwrap();
        params.goal_config = goal;
        params.step_length = 0.1;
        params.max_iterations = 5000;
        params.random_seed = 42;
        (params, live)
    }

    #[test]
    fn test_rrt_extension_default() {
        let config = RrtExtension::default();
        assert_eq!(config.goal_sample_rate, 5);
        assert_eq!(config.default_max_iterations, 5000);
    }

    #[test]
    fn test_rrt_finds_path_around_disk() {
        let (params, mut live) = setup(vec![1.0, 1.0]);
        let mut planner = RrtPlanner::new();
        let init = planner.init_plan(&mut live, &params).unwrap();
        assert!(init.has_solution());
        let mut traj = Trajectory::new(2);
        let status = planner.plan_path(&mut live, &mut traj, PlanningOptions::empty()).unwrap();
        assert!(status.has_solution(), "{}", status.description);
        assert_eq!(traj.first().unwrap().values, vec![0.0, 0.0]);
        assert_eq!(traj.last().unwrap().values, vec![1.0, 1.0]);
        assert!(status.num_planner_iterations > 0);
        assert!(!status.error_origin.is_empty());
        assert_eq!(planner.state(), PlannerState::Succeeded);
    }

    #[test]
    fn test_goal_in_collision() {
        let (params, mut live) = setup(vec![0.5, 0.5]);
        let mut planner = RrtPlanner::new();
        let status = planner.init_plan(&mut live, &params).unwrap();
        assert!(!status.has_solution());
        assert!(status.status_code.contains(PlannerStatusCode::FAILED_DUE_TO_GOAL));
        assert!(status.status_code.contains(PlannerStatusCode::FAILED_DUE_TO_ENV_COLLISION));
    }

    #[test]
    fn test_missing_goal_is_error() {
        let (params, mut live) = setup(Vec::new());
        let mut planner = RrtPlanner::new();
        assert!(matches!(
            planner.init_plan(&mut live, &params),
            Err(PlanningError::InvalidParameter(_))
        ));
        let mut traj = Trajectory::new(2);
        assert!(RrtPlanner::new()
            .plan_path(&mut live, &mut traj, PlanningOptions::empty())
            .is_err());
    }

    #[test]
    fn test_unknown_post_processor_is_error() {
        let (mut params, mut live) = setup(vec![1.0, 1.0]);
        params.post_processing_planner = "smoother".to_string();
        assert!(matches!(
            RrtPlanner::new().init_plan(&mut live, &params),
            Err(PlanningError::UnknownPlanner(_))
        ));
    }
}
