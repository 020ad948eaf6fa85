//! Configuration-space description and its default capabilities
//!
//! A [`ConfigurationSpecification`] lists the controllable quantities of a
//! [`RobotModel`] as ordered groups. From it the planner parameters derive
//! the DOF, the limit vectors and the default capability objects:
//! [`JointSpace`] for state access and metrics, [`UniformSampler`] and
//! [`GoalSetSampler`] for sampling.

use std::collections::BTreeSet;
use std::f64::consts::PI;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::common::{
    CollisionChecker, ConfigSampler, LiveState, PlannerRng, PlanningError, PlanningResult, Sampler,
    StateSpace,
};

bitflags! {
    /// Components of the base transform exposed to the planner
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AffineDofs: u32 {
        const X = 1;
        const Y = 2;
        const Z = 4;
        /// yaw about the vertical axis
        const ROTATION_AXIS = 8;
    }
}

impl AffineDofs {
    pub fn dof(self) -> usize {
        self.bits().count_ones() as usize
    }

    /// Indices into [`LiveState::affine`] in x, y, z, yaw order
    pub fn components(self) -> impl Iterator<Item = usize> {
        [Self::X, Self::Y, Self::Z, Self::ROTATION_AXIS]
            .into_iter()
            .enumerate()
            .filter(move |(_, flag)| self.contains(*flag))
            .map(|(i, _)| i)
    }
}

/// One named group of controllable quantities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigurationGroup {
    JointValues { indices: Vec<usize> },
    JointVelocities { indices: Vec<usize> },
    AffineTransform { dofs: AffineDofs },
    AffineVelocities { dofs: AffineDofs },
}

impl ConfigurationGroup {
    pub fn dof(&self) -> usize {
        match self {
            ConfigurationGroup::JointValues { indices }
            | ConfigurationGroup::JointVelocities { indices } => indices.len(),
            ConfigurationGroup::AffineTransform { dofs }
            | ConfigurationGroup::AffineVelocities { dofs } => dofs.dof(),
        }
    }

    fn targets(&self) -> Vec<DofTarget> {
        match self {
            ConfigurationGroup::JointValues { indices } => {
                indices.iter().map(|&i| DofTarget::JointValue(i)).collect()
            }
            ConfigurationGroup::JointVelocities { indices } => {
                indices.iter().map(|&i| DofTarget::JointVelocity(i)).collect()
            }
            ConfigurationGroup::AffineTransform { dofs } => {
                dofs.components().map(DofTarget::Affine).collect()
            }
            ConfigurationGroup::AffineVelocities { dofs } => {
                dofs.components().map(DofTarget::AffineVelocity).collect()
            }
        }
    }
}

/// Ordered layout of a configuration vector
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigurationSpecification {
    pub groups: Vec<ConfigurationGroup>,
}

impl ConfigurationSpecification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Specification covering the given joint values only
    pub fn joint_values(indices: impl IntoIterator<Item = usize>) -> Self {
        Self::new().with_group(ConfigurationGroup::JointValues {
            indices: indices.into_iter().collect(),
        })
    }

    pub fn with_group(mut self, group: ConfigurationGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn dof(&self) -> usize {
        self.groups.iter().map(ConfigurationGroup::dof).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.dof() == 0
    }

    /// Checks the specification against a robot: indices in range and no
    /// quantity listed twice
    pub fn validate(&self, robot: &RobotModel) -> PlanningResult<()> {
        if self.is_empty() {
            return Err(PlanningError::invalid_configuration(
                "configuration specification has no degrees of freedom",
            ));
        }
        let mut seen = BTreeSet::new();
        for target in self.targets() {
            if let DofTarget::JointValue(i) | DofTarget::JointVelocity(i) = target {
                if i >= robot.joints.len() {
                    return Err(PlanningError::invalid_configuration(format!(
                        "joint index {} out of range for robot `{}` with {} joints",
                        i,
                        robot.name,
                        robot.joints.len()
                    )));
                }
            }
            if !seen.insert(target) {
                return Err(PlanningError::invalid_configuration(format!(
                    "{:?} appears twice in the configuration specification",
                    target
                )));
            }
        }
        Ok(())
    }

    fn targets(&self) -> Vec<DofTarget> {
        self.groups.iter().flat_map(ConfigurationGroup::targets).collect()
    }
}

/// Where one configuration DOF lives on the live state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DofTarget {
    JointValue(usize),
    JointVelocity(usize),
    Affine(usize),
    AffineVelocity(usize),
}

/// Joint description: position limits, derivative limits and discretization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointInfo {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub max_velocity: f64,
    pub max_acceleration: f64,
    /// 0 means unlimited
    pub max_jerk: f64,
    pub resolution: f64,
    /// metric weight
    pub weight: f64,
    /// revolute joint without stops, values wrap into [-pi, pi)
    pub circular: bool,
}

impl JointInfo {
    pub fn new(name: &str, lower: f64, upper: f64) -> Self {
        Self {
            name: name.to_string(),
            lower,
            upper,
            max_velocity: 1.0,
            max_acceleration: 5.0,
            max_jerk: 0.0,
            resolution: 0.02,
            weight: 1.0,
            circular: false,
        }
    }

    pub fn circular(name: &str) -> Self {
        Self {
            circular: true,
            ..Self::new(name, -PI, PI)
        }
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_limits(mut self, velocity: f64, acceleration: f64, jerk: f64) -> Self {
        self.max_velocity = velocity;
        self.max_acceleration = acceleration;
        self.max_jerk = jerk;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Robot description the planner is bound to.
///
/// The model describes the robot; the state lives in a separate [`LiveState`].
#[derive(Clone)]
pub struct RobotModel {
    pub name: String,
    pub joints: Vec<JointInfo>,
    /// x, y, z, yaw
    pub affine_lower: [f64; 4],
    pub affine_upper: [f64; 4],
    pub affine_max_velocity: [f64; 4],
    pub affine_resolution: [f64; 4],
    pub collision_checker: Option<Rc<dyn CollisionChecker>>,
}

impl RobotModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            joints: Vec::new(),
            affine_lower: [-10.0, -10.0, -10.0, -PI],
            affine_upper: [10.0, 10.0, 10.0, PI],
            affine_max_velocity: [1.0, 1.0, 1.0, 1.0],
            affine_resolution: [0.01, 0.01, 0.01, 0.01],
            collision_checker: None,
        }
    }

    pub fn with_joint(mut self, joint: JointInfo) -> Self {
        self.joints.push(joint);
        self
    }

    pub fn with_collision_checker(mut self, checker: Rc<dyn CollisionChecker>) -> Self {
        self.collision_checker = Some(checker);
        self
    }

    pub fn num_joints(&self) -> usize {
        self.joints.len()
    }

    /// Live state sized for this robot, all joints at zero
    pub fn live_state(&self) -> LiveState {
        LiveState::new(self.joints.len())
    }

    /// Limit vectors of the configuration space described by `spec`
    pub fn dof_limits(&self, spec: &ConfigurationSpecification) -> PlanningResult<DofLimits> {
        spec.validate(self)?;
        let mut limits = DofLimits::default();
        for target in spec.targets() {
            let (lower, upper, vel, acc, jerk, res, weight, circular) = match target {
                DofTarget::JointValue(i) => {
                    let j = &self.joints[i];
                    (
                        j.lower,
                        j.upper,
                        j.max_velocity,
                        j.max_acceleration,
                        j.max_jerk,
                        j.resolution,
                        j.weight,
                        j.circular,
                    )
                }
                DofTarget::JointVelocity(i) => {
                    let j = &self.joints[i];
                    (
                        -j.max_velocity,
                        j.max_velocity,
                        j.max_acceleration,
                        j.max_jerk,
                        0.0,
                        j.resolution,
                        j.weight,
                        false,
                    )
                }
                DofTarget::Affine(c) => (
                    self.affine_lower[c],
                    self.affine_upper[c],
                    self.affine_max_velocity[c],
                    0.0,
                    0.0,
                    self.affine_resolution[c],
                    1.0,
                    c == 3,
                ),
                DofTarget::AffineVelocity(c) => (
                    -self.affine_max_velocity[c],
                    self.affine_max_velocity[c],
                    0.0,
                    0.0,
                    0.0,
                    self.affine_resolution[c],
                    1.0,
                    false,
                ),
            };
            if !lower.is_finite() || !upper.is_finite() {
                return Err(PlanningError::invalid_configuration(format!(
                    "{:?} has non-finite limits [{}, {}]",
                    target, lower, upper
                )));
            }
            if lower > upper {
                return Err(PlanningError::invalid_configuration(format!(
                    "{:?} has lower limit {} above upper limit {}",
                    target, lower, upper
                )));
            }
            if !(res > 0.0) {
                return Err(PlanningError::invalid_configuration(format!(
                    "{:?} has non-positive resolution {}",
                    target, res
                )));
            }
            limits.lower.push(lower);
            limits.upper.push(upper);
            limits.velocity.push(vel);
            limits.acceleration.push(acc);
            limits.jerk.push(jerk);
            limits.resolution.push(res);
            limits.weights.push(weight);
            limits.circular.push(circular);
        }
        Ok(limits)
    }
}

impl fmt::Debug for RobotModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RobotModel")
            .field("name", &self.name)
            .field("joints", &self.joints)
            .field("has_collision_checker", &self.collision_checker.is_some())
            .finish()
    }
}

/// Per-DOF limits of a configuration space
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DofLimits {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub velocity: Vec<f64>,
    pub acceleration: Vec<f64>,
    pub jerk: Vec<f64>,
    pub resolution: Vec<f64>,
    pub weights: Vec<f64>,
    pub circular: Vec<bool>,
}

/// Wraps an angle into [-pi, pi)
pub fn normalize_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

/// State space over a robot's joints and base transform
#[derive(Debug, Clone)]
pub struct JointSpace {
    targets: Vec<DofTarget>,
    weights: Vec<f64>,
    circular: Vec<bool>,
}

impl JointSpace {
    pub fn new(robot: &RobotModel, spec: &ConfigurationSpecification) -> PlanningResult<Self> {
        let limits = robot.dof_limits(spec)?;
        Ok(Self {
            targets: spec.targets(),
            weights: limits.weights,
            circular: limits.circular,
        })
    }

    pub fn is_circular(&self, i: usize) -> bool {
        self.circular.get(i).copied().unwrap_or(false)
    }
}

impl StateSpace for JointSpace {
    fn dof(&self) -> usize {
        self.targets.len()
    }

    fn get_state(&self, live: &LiveState, out: &mut Vec<f64>) {
        out.clear();
        out.extend(self.targets.iter().map(|target| match *target {
            DofTarget::JointValue(i) => live.joint_values.get(i).copied().unwrap_or(0.0),
            DofTarget::JointVelocity(i) => live.joint_velocities.get(i).copied().unwrap_or(0.0),
            DofTarget::Affine(c) => live.affine[c],
            DofTarget::AffineVelocity(c) => live.affine_velocity[c],
        }));
    }

    fn set_state(&self, live: &mut LiveState, values: &[f64]) -> PlanningResult<()> {
        PlanningError::check_len("state", self.targets.len(), values.len())?;
        for (target, &v) in self.targets.iter().zip(values) {
            let slot = match *target {
                DofTarget::JointValue(i) => live.joint_values.get_mut(i),
                DofTarget::JointVelocity(i) => live.joint_velocities.get_mut(i),
                DofTarget::Affine(c) => Some(&mut live.affine[c]),
                DofTarget::AffineVelocity(c) => Some(&mut live.affine_velocity[c]),
            };
            match slot {
                Some(slot) => *slot = v,
                None => {
                    return Err(PlanningError::state_setting(format!(
                        "live state has no slot for {:?}",
                        target
                    )))
                }
            }
        }
        live.mark_updated();
        Ok(())
    }

    fn diff_state(&self, q1: &mut [f64], q2: &[f64]) {
        for (i, (a, b)) in q1.iter_mut().zip(q2).enumerate() {
            *a -= b;
            if self.is_circular(i) {
                *a = normalize_angle(*a);
            }
        }
    }

    fn add_state(&self, q: &mut [f64], delta: &[f64]) {
        for (i, (a, d)) in q.iter_mut().zip(delta).enumerate() {
            *a += d;
            if self.is_circular(i) {
                *a = normalize_angle(*a);
            }
        }
    }

    fn distance(&self, q0: &[f64], q1: &[f64]) -> f64 {
        let mut delta = q1.to_vec();
        self.diff_state(&mut delta, q0);
        DVector::from_iterator(
            delta.len(),
            delta.iter().zip(&self.weights).map(|(d, w)| d * w.sqrt()),
        )
        .norm()
    }
}

/// Uniform sampler over the limit box
#[derive(Debug, Clone)]
pub struct UniformSampler {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl UniformSampler {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> PlanningResult<Self> {
        PlanningError::check_len("upper limit", lower.len(), upper.len())?;
        if let Some((lo, hi)) = lower
            .iter()
            .zip(&upper)
            .find(|(lo, hi)| !(lo.is_finite() && hi.is_finite() && lo <= hi))
        {
            return Err(PlanningError::invalid_parameter(format!(
                "sampler limits [{}, {}] are not a finite range",
                lo, hi
            )));
        }
        Ok(Self { lower, upper })
    }
}

impl Sampler for UniformSampler {
    fn sample(&self, rng: &mut PlannerRng, out: &mut Vec<f64>) -> bool {
        out.clear();
        out.extend(
            self.lower
                .iter()
                .zip(&self.upper)
                .map(|(&lo, &hi)| rng.gen_range(lo..=hi)),
        );
        true
    }

    fn sample_neighbor(
        &self,
        rng: &mut PlannerRng,
        out: &mut Vec<f64>,
        near: &[f64],
        radius: f64,
    ) -> bool {
        if near.len() != self.lower.len() {
            return false;
        }
        let direction: Vec<f64> = (0..near.len()).map(|_| rng.sample::<f64, _>(StandardNormal)).collect();
        let norm = DVector::from_column_slice(&direction).norm();
        let scale = if norm > 0.0 { radius * rng.gen::<f64>() / norm } else { 0.0 };
        out.clear();
        out.extend(
            near.iter()
                .zip(&direction)
                .zip(self.lower.iter().zip(&self.upper))
                .map(|((q, d), (&lo, &hi))| (q + scale * d).clamp(lo, hi)),
        );
        true
    }
}

/// Draws one configuration out of a fixed set, e.g. the goal configurations
#[derive(Debug, Clone)]
pub struct GoalSetSampler {
    configs: Vec<Vec<f64>>,
}

impl GoalSetSampler {
    pub fn new(configs: Vec<Vec<f64>>) -> Self {
        Self { configs }
    }

    /// Splits a flattened vector into configurations of length `dof`
    pub fn from_flat(flat: &[f64], dof: usize) -> Self {
        Self::new(flat.chunks(dof.max(1)).map(<[f64]>::to_vec).collect())
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

impl ConfigSampler for GoalSetSampler {
    fn sample(&self, rng: &mut PlannerRng, out: &mut Vec<f64>) -> bool {
        if self.configs.is_empty() {
            return false;
        }
        let index = rng.gen_range(0..self.configs.len());
        out.clear();
        out.extend_from_slice(&self.configs[index]);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn arm() -> RobotModel {
        RobotModel::new("arm")
            .with_joint(JointInfo::new("shoulder", -1.0, 1.0))
            .with_joint(JointInfo::circular("wrist"))
    }

    #[test]
    fn test_specification_dof_and_validation() {
        let robot = arm();
        let spec = ConfigurationSpecification::joint_values([0, 1]).with_group(
            ConfigurationGroup::AffineTransform {
                dofs: AffineDofs::X | AffineDofs::Y | AffineDofs::ROTATION_AXIS,
            },
        );
        assert_eq!(spec.dof(), 5);
        assert!(spec.validate(&robot).is_ok());

        let out_of_range = ConfigurationSpecification::joint_values([2]);
        assert!(matches!(
            out_of_range.validate(&robot),
            Err(PlanningError::InvalidConfiguration(_))
        ));
        let duplicate = ConfigurationSpecification::joint_values([0, 0]);
        assert!(duplicate.validate(&robot).is_err());
        assert!(ConfigurationSpecification::new().validate(&robot).is_err());
    }

    #[test]
    fn test_joint_space_wraps_circular_dofs() {
        let robot = arm();
        let space = JointSpace::new(&robot, &ConfigurationSpecification::joint_values([0, 1])).unwrap();
        let mut delta = vec![0.5, -3.0];
        space.diff_state(&mut delta, &[0.0, 3.0]);
        assert_relative_eq!(delta[0], 0.5);
        assert_relative_eq!(delta[1], 2.0 * PI - 6.0, epsilon = 1e-12);
        assert_relative_eq!(space.distance(&[0.0, 3.0], &[0.0, -3.0]), 2.0 * PI - 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_joint_space_get_set_affine() {
        let robot = arm();
        let spec = ConfigurationSpecification::joint_values([1])
            .with_group(ConfigurationGroup::AffineTransform { dofs: AffineDofs::X | AffineDofs::Z });
        let space = JointSpace::new(&robot, &spec).unwrap();
        let mut live = robot.live_state();
        space.set_state(&mut live, &[0.3, 1.5, -2.0]).unwrap();
        assert_eq!(live.joint_values, vec![0.0, 0.3]);
        assert_eq!(live.affine, [1.5, 0.0, -2.0, 0.0]);
        let mut out = Vec::new();
        space.get_state(&live, &mut out);
        assert_eq!(out, vec![0.3, 1.5, -2.0]);
        assert!(space.set_state(&mut live, &[0.0]).is_err());
    }

    #[test]
    fn test_set_state_on_short_live_state_fails() {
        let robot = arm();
        let space = JointSpace::new(&robot, &ConfigurationSpecification::joint_values([1])).unwrap();
        let mut live = LiveState::new(1);
        assert!(matches!(
            space.set_state(&mut live, &[0.1]),
            Err(PlanningError::StateSetting(_))
        ));
    }

    #[test]
    fn test_non_finite_limits_are_rejected() {
        let robot = arm().with_joint(JointInfo::new("slider", f64::NEG_INFINITY, 1.0));
        assert!(matches!(
            robot.dof_limits(&ConfigurationSpecification::joint_values([0, 2])),
            Err(PlanningError::InvalidConfiguration(_))
        ));
        assert!(robot.dof_limits(&ConfigurationSpecification::joint_values([0, 1])).is_ok());
        assert!(UniformSampler::new(vec![f64::NAN], vec![1.0]).is_err());
        assert!(UniformSampler::new(vec![0.0], vec![f64::INFINITY]).is_err());
    }

    #[test]
    fn test_uniform_sampler_is_seeded_and_bounded() {
        let sampler = UniformSampler::new(vec![-1.0, 0.0], vec![1.0, 2.0]).unwrap();
        let mut a = PlannerRng::seed_from_u64(7);
        let mut b = PlannerRng::seed_from_u64(7);
        let (mut qa, mut qb) = (Vec::new(), Vec::new());
        for _ in 0..20 {
            assert!(sampler.sample(&mut a, &mut qa));
            assert!(sampler.sample(&mut b, &mut qb));
            assert_eq!(qa, qb);
            assert!(qa[0] >= -1.0 && qa[0] <= 1.0);
            assert!(qa[1] >= 0.0 && qa[1] <= 2.0);
        }
        assert!(sampler.sample_neighbor(&mut a, &mut qa, &[0.0, 1.0], 0.1));
        assert!(((qa[0]).powi(2) + (qa[1] - 1.0).powi(2)).sqrt() <= 0.1 + 1e-12);
    }

    #[test]
    fn test_goal_set_sampler() {
        let sampler = GoalSetSampler::from_flat(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(sampler.len(), 2);
        let mut rng = PlannerRng::seed_from_u64(1);
        let mut q = Vec::new();
        assert!(sampler.sample(&mut rng, &mut q));
        assert!(q == vec![1.0, 2.0] || q == vec![3.0, 4.0]);
        assert!(!GoalSetSampler::new(Vec::new()).sample(&mut rng, &mut q));
    }
}
