// Plan a planar two-joint configuration space around disk obstacles with RRT,
// shortcut the result and plot the tree and both paths.

use std::rc::Rc;

use tracing::{error, info};

use planner_core::common::{CollisionChecker, CollisionPair, CollisionReport, LiveState, Planner, PlanningResult, Trajectory};
use planner_core::path_planning::{
    ConfigurationSpecification, JointInfo, PlannerParameters, PlanningOptions, RobotModel, RrtExtension, RrtPlanner,
    ShortcutPlanner,
};
use planner_core::utils::{colors, PathStyle, Visualizer};

/// Disks (cx, cy, radius) in joint space
const OBSTACLES: [(f64, f64, f64); 4] = [(-1.0, 1.0, 0.6), (0.5, -0.5, 0.8), (1.5, 1.5, 0.5), (-1.5, -1.5, 0.7)];

struct DiskField {
    disks: Vec<(f64, f64, f64)>,
}

impl CollisionChecker for DiskField {
    fn check_env_collision(&self, live: &LiveState, report: Option<&mut CollisionReport>) -> PlanningResult<bool> {
        let (x, y) = (live.joint_values[0], live.joint_values[1]);
        let hit = self
            .disks
            .iter()
            .position(|(cx, cy, r)| (x - cx).powi(2) + (y - cy).powi(2) <= r * r);
        if let (Some(index), Some(report)) = (hit, report) {
            report.add_pair(CollisionPair::new("arm", "tip", "field", &format!("disk{}", index)));
        }
        Ok(hit.is_some())
    }
}

fn main() -> PlanningResult<()> {
    tracing_subscriber::fmt::init();

    let robot = RobotModel::new("planar_2dof")
        .with_joint(JointInfo::circular("shoulder").with_resolution(0.01))
        .with_joint(JointInfo::circular("elbow").with_resolution(0.01))
        .with_collision_checker(Rc::new(DiskField {
            disks: OBSTACLES.to_vec(),
        }));
    let mut live = robot.live_state();
    live.joint_values = vec![-2.5, 2.5];
    live.mark_updated();

    let mut params = PlannerParameters::new();
    params.set_configuration_specification(&robot, ConfigurationSpecification::joint_values([0, 1]), &live)?;
    params.set_goal_config(vec![2.5, -2.5])?;
    params.step_length = 0.2;
    params.random_seed = 7;
    params.set_extension(&RrtExtension {
        goal_sample_rate: 10,
        ..Default::default()
    })?;

    let mut rrt = RrtPlanner::new();
    let init = rrt.init_plan(&mut live, &params)?;
    if !init.has_solution() {
        error!("init failed: {}", init.description);
        return Ok(());
    }
    let mut raw = Trajectory::new(2);
    let status = rrt.plan_path(&mut live, &mut raw, PlanningOptions::ADD_COLLISION_STATISTICS)?;
    if !status.has_solution() {
        error!("{}", status.description);
        return Ok(());
    }
    info!(
        "rrt: {} waypoints, {} iterations, {} us",
        raw.len(),
        status.num_planner_iterations,
        status.elapsed_planning_time_us
    );
    for ((body, link), count) in &status.colliding_links_count {
        info!("  {}/{} collided {} times", body, link, count);
    }

    let mut smoothed = raw.clone();
    let mut shortcut = ShortcutPlanner::new();
    shortcut.init_plan(&mut live, &params)?;
    let hook = shortcut.plan_path(&mut live, &mut smoothed, PlanningOptions::empty())?;
    info!("shortcut: {} -> {} waypoints ({})", raw.len(), smoothed.len(), hook.description);

    let mut vis = Visualizer::new();
    vis.set_title("RRT in joint space")
        .set_x_range(-std::f64::consts::PI, std::f64::consts::PI)
        .set_y_range(-std::f64::consts::PI, std::f64::consts::PI)
        .plot_disks(&OBSTACLES)
        .plot_tree(rrt.get_tree())
        .plot_trajectory(&raw, &PathStyle::default())
        .plot_trajectory(&smoothed, &PathStyle::new(colors::SHORTCUT, "Shortcut"))
        .plot_start(&[-2.5, 2.5])
        .plot_goal(&[2.5, -2.5]);
    if let Err(e) = vis.save_png("plan_2dof.png", 800, 800) {
        error!("could not save the plot: {}", e);
    }
    Ok(())
}
