//! Path shortcutting post-processor
//!
//! Shortens a finished path in two passes. The greedy pass walks from the
//! start and jumps to the furthest waypoint reachable by a valid straight
//! segment. The random pass then tries to connect random waypoint pairs and
//! keeps a shortcut only when it is valid and shorter than the part it
//! replaces.

use std::rc::Rc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{
    IntervalType, LiveState, Planner, PlannerRng, PlanningError, PlanningResult, Trajectory,
};
use crate::path_planning::callbacks::{PlanCallbackRegistry, PlannerProgress};
use crate::path_planning::options::*;
use crate::path_planning::parameters::{ParameterExtension, PlannerParameters};
use crate::path_planning::planner::retime_linear;
use crate::path_planning::status::PlannerStatus;
use crate::planner_status;

const MIN_IMPROVEMENT: f64 = 1e-9;

/// Shortcut specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortcutExtension {
    /// random shortcut attempts
    pub max_iterations: u32,
    /// run the furthest-visible pass first
    pub greedy: bool,
}

impl Default for ShortcutExtension {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            greedy: true,
        }
    }
}

impl ParameterExtension for ShortcutExtension {
    const NAME: &'static str = "shortcut";
}

pub struct ShortcutPlanner {
    params: Option<Rc<PlannerParameters>>,
    config: ShortcutExtension,
    callbacks: PlanCallbackRegistry,
    rng: PlannerRng,
}

impl ShortcutPlanner {
    pub const NAME: &'static str = "shortcut";

    pub fn new() -> Self {
        Self {
            params: None,
            config: ShortcutExtension::default(),
            callbacks: PlanCallbackRegistry::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    fn is_visible(
        params: &PlannerParameters,
        live: &mut LiveState,
        q0: &[f64],
        q1: &[f64],
    ) -> PlanningResult<bool> {
        let zero = vec![0.0; q0.len()];
        let code = params.functions.check_path_all_constraints(
            live,
            q0,
            q1,
            &zero,
            &zero,
            0.0,
            IntervalType::OpenStart,
            ConstraintFilterOptions::RECOMMENDED | ConstraintFilterOptions::FROM_PATH_SHORTCUTTING,
            None,
        )?;
        Ok(code.is_empty())
    }

    fn length(params: &PlannerParameters, path: &[Vec<f64>]) -> PlanningResult<f64> {
        let mut total = 0.0;
        for pair in path.windows(2) {
            total += params.functions.distance(&pair[0], &pair[1])?;
        }
        Ok(total)
    }

    /// Keeps the furthest visible waypoint from each kept one
    fn shorten_greedy(
        params: &PlannerParameters,
        live: &mut LiveState,
        path: &[Vec<f64>],
    ) -> PlanningResult<Vec<Vec<f64>>> {
        if path.len() <= 2 {
            return Ok(path.to_vec());
        }
        let mut result = Vec::new();
        let mut current = 0;
        while current < path.len() {
            result.push(path[current].clone());
            if current == path.len() - 1 {
                break;
            }
            let mut furthest = current + 1;
            for i in (current + 2)..path.len() {
                if Self::is_visible(params, live, &path[current], &path[i])? {
                    furthest = i;
                }
            }
            current = furthest;
        }
        Ok(result)
    }

    /// One random attempt; returns whether the path changed
    fn try_random_shortcut(
        &mut self,
        params: &PlannerParameters,
        live: &mut LiveState,
        path: &mut Vec<Vec<f64>>,
    ) -> PlanningResult<bool> {
        if path.len() <= 2 {
            return Ok(false);
        }
        let i = self.rng.gen_range(0..path.len() - 2);
        let j = self.rng.gen_range(i + 2..path.len());
        let direct = params.functions.distance(&path[i], &path[j])?;
        let current = Self::length(params, &path[i..=j])?;
        if direct + MIN_IMPROVEMENT >= current {
            return Ok(false);
        }
        if !Self::is_visible(params, live, &path[i], &path[j])? {
            return Ok(false);
        }
        path.drain(i + 1..j);
        Ok(true)
    }

    fn write_path(params: &PlannerParameters, traj: &mut Trajectory, path: &[Vec<f64>]) -> PlanningResult<()> {
        traj.reset(params.dof());
        for q in path {
            traj.push(q)?;
        }
        if !params.velocity_limit.is_empty() {
            retime_linear(traj, params.functions.space()?.as_ref(), &params.velocity_limit)?;
        }
        Ok(())
    }
}

impl Default for ShortcutPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner for ShortcutPlanner {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn init_plan(&mut self, _live: &mut LiveState, params: &PlannerParameters) -> PlanningResult<PlannerStatus> {
        params.validate()?;
        params.functions.space()?;
        self.config = params.extension_or_default::<ShortcutExtension>()?;
        self.rng = StdRng::seed_from_u64(u64::from(params.random_seed));
        self.params = Some(Rc::new(params.clone()));
        Ok(planner_status!("shortcut initialized", PlannerStatusCode::HAS_SOLUTION)
            .with_parameters(self.params.clone()))
    }

    fn plan_path(
        &mut self,
        live: &mut LiveState,
        traj: &mut Trajectory,
        options: PlanningOptions,
    ) -> PlanningResult<PlannerStatus> {
        let params = self
            .params
            .clone()
            .ok_or_else(|| PlanningError::invalid_parameter("init_plan must be called before plan_path"))?;
        PlanningError::check_len("trajectory", params.dof(), traj.dof())?;
        let started = Instant::now();
        let mut path: Vec<Vec<f64>> = traj.configurations().map(<[f64]>::to_vec).collect();
        let before = Self::length(&params, &path)?;

        if self.config.greedy {
            path = Self::shorten_greedy(&params, live, &path)?;
        }
        let mut iterations = 0;
        let mut status = planner_status!("shortcut finished", PlannerStatusCode::HAS_SOLUTION);
        while iterations < self.config.max_iterations && path.len() > 2 {
            if self.callbacks.call_callbacks(&PlannerProgress { iteration: iterations }) != PlannerAction::None {
                status = planner_status!(
                    "shortcut interrupted, returning the current path",
                    PlannerStatusCode::INTERRUPTED_WITH_SOLUTION
                );
                break;
            }
            iterations += 1;
            self.try_random_shortcut(&params, live, &mut path)?;
        }

        Self::write_path(&params, traj, &path)?;
        debug!(
            "shortcut reduced the path from {:.3} to {:.3} ({} waypoints)",
            before,
            Self::length(&params, &path)?,
            path.len()
        );
        let mut status = status
            .with_progress(iterations, started.elapsed())
            .with_parameters(self.params.clone());
        if options.contains(PlanningOptions::NO_STATUS_DETAIL) {
            status.strip_detail();
        }
        Ok(status)
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

    /// Wall at x in [0.4, 0.6] for y < 0.8
    struct Wall;

    impl CollisionChecker for Wall {
        fn check_env_collision(&self, live: &LiveState, _report: Option<&mut CollisionReport>) -> PlanningResult<bool> {
            let (x, y) = (live.joint_values[0], live.joint_values[1]);
            Ok((0.4..=0.6).contains(&x) && y < 0.8)
        }
    }

    fn setup() -> (PlannerParameters, LiveState) {
        let robot = RobotModel::new("planar")
            .with_joint(JointInfo::new("x", 0.0, 1.0).with_resolution(0.01))
            .with_joint(JointInfo::new("y", 0.0, 1.0).with_resolution(0.01))
            .with_collision_checker(Rc::new(Wall));
        let live = robot.live_state();
        let mut params = PlannerParameters::new();
        params
            .set_configuration_specification(&robot, ConfigurationSpecification::joint_values([0, 1]), &live)
            .unwrap();
        (params, live)
    }

    fn trajectory(points: &[[f64; 2]]) -> Trajectory {
        let mut traj = Trajectory::new(2);
        for p in points {
            traj.push(p).unwrap();
        }
        traj
    }

    #[test]
    fn test_straight_line_collapses() {
        let (params, mut live) = setup();
        let mut traj = trajectory(&[[0.0, 0.9], [0.3, 0.9], [0.5, 0.9], [0.7, 0.9], [1.0, 0.9]]);
        let mut planner = ShortcutPlanner::new();
        assert!(planner.init_plan(&mut live, &params).unwrap().has_solution());
        let status = planner.plan_path(&mut live, &mut traj, PlanningOptions::empty()).unwrap();
        assert!(status.has_solution());
        assert_eq!(traj.len(), 2);
        assert_eq!(traj.last().unwrap().values, vec![1.0, 0.9]);
    }

    #[test]
    fn test_detour_stays_valid_and_shorter() {
        let (params, mut live) = setup();
        let original = trajectory(&[[0.1, 0.1], [0.1, 0.5], [0.2, 0.9], [0.5, 0.9], [0.8, 0.9], [0.9, 0.5], [0.9, 0.1]]);
        let mut traj = original.clone();
        let mut planner = ShortcutPlanner::new();
        planner.init_plan(&mut live, &params).unwrap();
        planner.plan_path(&mut live, &mut traj, PlanningOptions::empty()).unwrap();

        let space = params.functions.space().unwrap().as_ref();
        let before = crate::path_planning::planner::path_length(&original, space);
        let after = crate::path_planning::planner::path_length(&traj, space);
        assert!(after < before);
        assert!(traj.len() >= 3);
        for pair in traj.waypoints().windows(2) {
            assert!(params
                .functions
                .check_path_constraints(&mut live, &pair[0].values, &pair[1].values, IntervalType::Closed, None)
                .unwrap());
        }
    }

    #[test]
    fn test_interrupt_returns_current_path() {
        let (mut params, mut live) = setup();
        params
            .set_extension(&ShortcutExtension {
                max_iterations: 50,
                greedy: false,
            })
            .unwrap();
        let mut traj = trajectory(&[[0.0, 0.9], [0.3, 0.9], [0.7, 0.9], [1.0, 0.9]]);
        let mut planner = ShortcutPlanner::new();
        planner.init_plan(&mut live, &params).unwrap();
        let _handle = planner.callbacks().register(|_| PlannerAction::Interrupt);
        let status = planner.plan_path(&mut live, &mut traj, PlanningOptions::empty()).unwrap();
        assert_eq!(status.status_code, PlannerStatusCode::INTERRUPTED_WITH_SOLUTION);
        assert_eq!(status.num_planner_iterations, 0);
        assert_eq!(traj.len(), 4);
    }

    #[test]
    fn test_dof_mismatch() {
        let (params, mut live) = setup();
        let mut planner = ShortcutPlanner::new();
        planner.init_plan(&mut live, &params).unwrap();
        let mut traj = Trajectory::new(3);
        assert!(matches!(
            planner.plan_path(&mut live, &mut traj, PlanningOptions::empty()),
            Err(PlanningError::DimensionMismatch { .. })
        ));
    }
}
