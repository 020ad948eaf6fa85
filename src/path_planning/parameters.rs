//! Planner parameters
//!
//! Describes the configuration space a planner works in: limits,
//! resolutions, initial and goal configurations, caps, the random seed and
//! the post-processing setup. The data fields round-trip through JSON; the
//! bound [`FunctionBundle`] is not serialized and must be rebound.
//!
//! Planner specific settings live in typed extensions stored by name, see
//! [`ParameterExtension`].

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::common::{
    CollisionChecker, GoalDistance, LiveState, PlanningError, PlanningResult, SampleConstraint,
    StateSpace,
};
use crate::path_planning::bundle::FunctionBundle;
use crate::path_planning::configuration::{
    ConfigurationSpecification, GoalSetSampler, JointSpace, RobotModel, UniformSampler,
};
use crate::path_planning::constraint_filter::{ConstraintFilterPipeline, DofLimitConstraint};
use crate::path_planning::neighbor::LinearNeighborState;

/// Step length used when the parameters leave it non-positive
pub const DEFAULT_STEP_LENGTH: f64 = 0.04;

/// Typed, named parameter block carried in [`PlannerParameters::extensions`]
pub trait ParameterExtension: Serialize + DeserializeOwned + Default {
    const NAME: &'static str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerParameters {
    pub configuration_specification: ConfigurationSpecification,
    pub lower_limit: Vec<f64>,
    pub upper_limit: Vec<f64>,
    pub velocity_limit: Vec<f64>,
    pub acceleration_limit: Vec<f64>,
    pub jerk_limit: Vec<f64>,
    pub resolution: Vec<f64>,
    /// one or more configurations, flattened
    pub initial_config: Vec<f64>,
    /// zero or more configurations, flattened
    pub goal_config: Vec<f64>,
    pub initial_velocities: Vec<f64>,
    pub goal_velocities: Vec<f64>,
    /// maximum distance between neighbors; non-positive picks a default
    pub step_length: f64,
    /// 0 lets the planner choose
    pub max_iterations: u32,
    /// wall-clock cap in ms, 0 means unbounded
    pub max_planning_time_ms: u32,
    pub random_seed: u32,
    /// name of the planner run over the result, empty for none
    pub post_processing_planner: String,
    /// JSON overlay applied to these parameters for the post-processing planner
    pub post_processing_parameters: String,
    /// opaque payload kept across copies and serialization
    pub extra_parameters: String,
    pub extensions: BTreeMap<String, Value>,
    #[serde(skip)]
    pub functions: FunctionBundle,
}

impl Default for PlannerParameters {
    fn default() -> Self {
        Self {
            configuration_specification: ConfigurationSpecification::default(),
            lower_limit: Vec::new(),
            upper_limit: Vec::new(),
            velocity_limit: Vec::new(),
            acceleration_limit: Vec::new(),
            jerk_limit: Vec::new(),
            resolution: Vec::new(),
            initial_config: Vec::new(),
            goal_config: Vec::new(),
            initial_velocities: Vec::new(),
            goal_velocities: Vec::new(),
            step_length: DEFAULT_STEP_LENGTH,
            max_iterations: 0,
            max_planning_time_ms: 0,
            random_seed: 0,
            post_processing_planner: String::new(),
            post_processing_parameters: String::new(),
            extra_parameters: String::new(),
            extensions: BTreeMap::new(),
            functions: FunctionBundle::default(),
        }
    }
}

impl PlannerParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Degrees of freedom, from the specification when one is set
    pub fn dof(&self) -> usize {
        if self.configuration_specification.is_empty() {
            self.lower_limit.len()
        } else {
            self.configuration_specification.dof()
        }
    }

    /// Checks every DOF-derived vector
    pub fn validate(&self) -> PlanningResult<()> {
        let dof = self.dof();
        if dof == 0 {
            return Err(PlanningError::invalid_parameter("configuration space has no degrees of freedom"));
        }
        PlanningError::check_len("lower limit", dof, self.lower_limit.len())?;
        PlanningError::check_len("upper limit", dof, self.upper_limit.len())?;
        PlanningError::check_len("resolution", dof, self.resolution.len())?;
        for (name, limits) in [
            ("velocity limit", &self.velocity_limit),
            ("acceleration limit", &self.acceleration_limit),
            ("jerk limit", &self.jerk_limit),
        ] {
            if !limits.is_empty() {
                PlanningError::check_len(name, dof, limits.len())?;
            }
        }
        for (i, (lo, hi)) in self.lower_limit.iter().zip(&self.upper_limit).enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(PlanningError::invalid_parameter(format!(
                    "DOF {} has non-finite limits [{}, {}]",
                    i, lo, hi
                )));
            }
            if !(lo <= hi) {
                return Err(PlanningError::invalid_parameter(format!(
                    "DOF {} has lower limit {} above upper limit {}",
                    i, lo, hi
                )));
            }
        }
        if let Some(r) = self.resolution.iter().find(|r| !(**r > 0.0)) {
            return Err(PlanningError::invalid_parameter(format!("resolution must be positive, got {}", r)));
        }
        for (name, values) in [
            ("initial configuration", &self.initial_config),
            ("goal configuration", &self.goal_config),
            ("initial velocities", &self.initial_velocities),
            ("goal velocities", &self.goal_velocities),
        ] {
            if values.len() % dof != 0 {
                return Err(PlanningError::invalid_parameter(format!(
                    "{} has {} values, not a multiple of {} DOF",
                    name,
                    values.len(),
                    dof
                )));
            }
        }
        if !self.step_length.is_finite() {
            return Err(PlanningError::invalid_parameter("step length must be finite"));
        }
        if self.functions.state_space.is_some() {
            self.functions.validate(dof)?;
        }
        Ok(())
    }

    pub fn initial_configs(&self) -> impl Iterator<Item = &[f64]> {
        self.initial_config.chunks(self.dof().max(1))
    }

    pub fn goal_configs(&self) -> impl Iterator<Item = &[f64]> {
        self.goal_config.chunks(self.dof().max(1))
    }

    pub fn effective_step_length(&self) -> f64 {
        if self.step_length > 0.0 {
            self.step_length
        } else {
            DEFAULT_STEP_LENGTH
        }
    }

    pub fn to_json(&self) -> PlanningResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses parameters; the function bundle comes back empty
    pub fn from_json(json: &str) -> PlanningResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Copies the data fields through serialization and the functions directly
    pub fn copy_from(&mut self, other: &PlannerParameters) -> PlanningResult<()> {
        let value = serde_json::to_value(other)?;
        *self = serde_json::from_value(value)?;
        self.functions = other.functions.clone();
        Ok(())
    }

    /// Parameters with the JSON object `overlay` merged over these ones.
    ///
    /// Objects merge key by key, every other value replaces. The function
    /// bundle is shared with `self`.
    pub fn apply_overlay(&self, overlay: &str) -> PlanningResult<PlannerParameters> {
        let mut merged = self.clone();
        if overlay.trim().is_empty() {
            return Ok(merged);
        }
        let overlay: Value = serde_json::from_str(overlay)?;
        if !overlay.is_object() {
            return Err(PlanningError::invalid_parameter("parameter overlay must be a JSON object"));
        }
        let mut base = serde_json::to_value(self)?;
        merge_json(&mut base, overlay);
        merged = serde_json::from_value(base)?;
        merged.functions = self.functions.clone();
        Ok(merged)
    }

    pub fn set_extension<E: ParameterExtension>(&mut self, extension: &E) -> PlanningResult<()> {
        self.extensions.insert(E::NAME.to_string(), serde_json::to_value(extension)?);
        Ok(())
    }

    pub fn extension<E: ParameterExtension>(&self) -> PlanningResult<Option<E>> {
        match self.extensions.get(E::NAME) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn extension_or_default<E: ParameterExtension>(&self) -> PlanningResult<E> {
        Ok(self.extension()?.unwrap_or_default())
    }

    /// Binds these parameters to `robot` through `spec`: fills the limit
    /// vectors, takes the initial configuration from `live` and binds the
    /// default function bundle.
    pub fn set_configuration_specification(
        &mut self,
        robot: &RobotModel,
        spec: ConfigurationSpecification,
        live: &LiveState,
    ) -> PlanningResult<()> {
        let limits = robot.dof_limits(&spec)?;
        let dof = spec.dof();
        let space: Rc<dyn StateSpace> = Rc::new(JointSpace::new(robot, &spec)?);

        self.configuration_specification = spec;
        self.lower_limit = limits.lower;
        self.upper_limit = limits.upper;
        self.velocity_limit = limits.velocity;
        self.acceleration_limit = limits.acceleration;
        self.jerk_limit = limits.jerk;
        self.resolution = limits.resolution;
        space.get_state(live, &mut self.initial_config);
        self.initial_velocities.clear();
        if self.goal_config.len() % dof != 0 {
            self.goal_config.clear();
        }
        if self.goal_velocities.len() % dof != 0 {
            self.goal_velocities.clear();
        }

        self.bind_default_functions(space, robot.collision_checker.clone())?;
        debug!(
            "bound {} DOF configuration space of `{}`",
            dof, robot.name
        );
        Ok(())
    }

    /// Binds the default capabilities over `space` and the current limits
    pub fn bind_default_functions(
        &mut self,
        space: Rc<dyn StateSpace>,
        collision: Option<Rc<dyn CollisionChecker>>,
    ) -> PlanningResult<()> {
        let neighbor = Rc::new(LinearNeighborState::new(
            space.clone(),
            self.lower_limit.clone(),
            self.upper_limit.clone(),
            self.resolution.clone(),
        )?);
        let mut pipeline = ConstraintFilterPipeline::new(
            space.clone(),
            self.lower_limit.clone(),
            self.upper_limit.clone(),
            self.resolution.clone(),
        )?
        .with_neighbor_state(neighbor.clone());
        if let Some(checker) = collision {
            pipeline = pipeline.with_collision_checker(checker);
        }
        if !self.velocity_limit.is_empty() {
            let limits: Rc<dyn SampleConstraint> = Rc::new(DofLimitConstraint::new(
                self.velocity_limit.clone(),
                self.acceleration_limit.clone(),
                self.jerk_limit.clone(),
            ));
            pipeline = pipeline.with_time_based_constraint(limits);
        }

        self.functions = FunctionBundle {
            state_space: Some(space),
            sampler: Some(Rc::new(UniformSampler::new(
                self.lower_limit.clone(),
                self.upper_limit.clone(),
            )?)),
            neighbor_state: Some(neighbor),
            path_constraints: Some(Rc::new(pipeline)),
            ..Default::default()
        };
        self.rebind_endpoint_functions();
        Ok(())
    }

    /// Rebinds the initial/goal samplers and the goal distance after the
    /// initial or goal configurations changed
    pub fn rebind_endpoint_functions(&mut self) {
        let dof = self.dof();
        self.functions.sample_initial = Some(Rc::new(GoalSetSampler::from_flat(&self.initial_config, dof)));
        if self.goal_config.is_empty() {
            self.functions.sample_goal = None;
            self.functions.goal_distance = None;
            return;
        }
        self.functions.sample_goal = Some(Rc::new(GoalSetSampler::from_flat(&self.goal_config, dof)));
        if let Some(space) = self.functions.state_space.clone() {
            let goals: Vec<Vec<f64>> = self.goal_configs().map(<[f64]>::to_vec).collect();
            let goal_distance: Rc<dyn GoalDistance> = Rc::new(move |q: &[f64]| {
                goals
                    .iter()
                    .map(|g| space.distance(q, g))
                    .fold(f64::INFINITY, f64::min)
            });
            self.functions.goal_distance = Some(goal_distance);
        }
    }

    pub fn set_initial_config(&mut self, initial: Vec<f64>) -> PlanningResult<()> {
        check_multiple("initial configuration", self.dof(), initial.len())?;
        self.initial_config = initial;
        self.rebind_endpoint_functions();
        Ok(())
    }

    pub fn set_goal_config(&mut self, goal: Vec<f64>) -> PlanningResult<()> {
        check_multiple("goal configuration", self.dof(), goal.len())?;
        self.goal_config = goal;
        self.rebind_endpoint_functions();
        Ok(())
    }
}

fn check_multiple(what: &'static str, dof: usize, len: usize) -> PlanningResult<()> {
    if dof == 0 || len % dof != 0 {
        return Err(PlanningError::DimensionMismatch {
            what,
            expected: dof,
            actual: len,
        });
    }
    Ok(())
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_planning::configuration::JointInfo;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Knobs {
        gain: f64,
        tries: u32,
    }

    impl Default for Knobs {
        fn default() -> Self {
            Self { gain: 0.5, tries: 3 }
        }
    }

    impl ParameterExtension for Knobs {
        const NAME: &'static str = "knobs";
    }

    fn robot() -> RobotModel {
        RobotModel::new("planar")
            .with_joint(JointInfo::new("j0", -1.0, 1.0).with_resolution(0.01))
            .with_joint(JointInfo::new("j1", -2.0, 2.0).with_resolution(0.03))
    }

    fn bound_params() -> PlannerParameters {
        let robot = robot();
        let live = LiveState::from_joint_values(vec![0.1, -0.2]);
        let mut params = PlannerParameters::new();
        params
            .set_configuration_specification(&robot, ConfigurationSpecification::joint_values([0, 1]), &live)
            .unwrap();
        params
    }

    #[test]
    fn test_setup_fills_limits_and_functions() {
        let params = bound_params();
        assert_eq!(params.dof(), 2);
        assert_eq!(params.lower_limit, vec![-1.0, -2.0]);
        assert_eq!(params.resolution, vec![0.01, 0.03]);
        assert_eq!(params.initial_config, vec![0.1, -0.2]);
        assert!(params.functions.sampler.is_some());
        assert!(params.functions.path_constraints.is_some());
        assert!(params.functions.sample_goal.is_none());
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_invalid_specification_is_configuration_error() {
        let mut params = PlannerParameters::new();
        let err = params
            .set_configuration_specification(&robot(), ConfigurationSpecification::joint_values([5]), &LiveState::new(2))
            .unwrap_err();
        assert!(matches!(err, PlanningError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_validate_rejects_partial_goal() {
        let mut params = bound_params();
        params.goal_config = vec![0.0, 0.0, 0.5];
        assert!(matches!(params.validate(), Err(PlanningError::InvalidParameter(_))));
        assert!(params.set_goal_config(vec![0.5]).is_err());
        params.set_goal_config(vec![0.5, 0.5, -0.5, -0.5]).unwrap();
        assert_eq!(params.goal_configs().count(), 2);
        assert_eq!(params.functions.goal_distance(&[0.5, 0.5]), Some(0.0));
    }

    #[test]
    fn test_validate_rejects_non_finite_limits() {
        let mut params = bound_params();
        params.upper_limit[1] = f64::NAN;
        assert!(matches!(params.validate(), Err(PlanningError::InvalidParameter(_))));
        params.upper_limit[1] = 2.0;
        params.lower_limit[0] = f64::NEG_INFINITY;
        assert!(matches!(params.validate(), Err(PlanningError::InvalidParameter(_))));
        params.lower_limit[0] = -1.0;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip_is_bit_exact() {
        let mut params = bound_params();
        params.set_goal_config(vec![1.0 / 3.0, std::f64::consts::PI / 7.0]).unwrap();
        params.extra_parameters = "<custom>opaque</custom>".to_string();
        params.random_seed = 1234;
        params.set_extension(&Knobs { gain: 0.1 + 0.2, tries: 9 }).unwrap();
        let back = PlannerParameters::from_json(&params.to_json().unwrap()).unwrap();
        assert_eq!(back.dof(), params.dof());
        assert_eq!(back.lower_limit, params.lower_limit);
        assert_eq!(back.upper_limit, params.upper_limit);
        assert_eq!(back.resolution, params.resolution);
        assert_eq!(back.goal_config[0].to_bits(), params.goal_config[0].to_bits());
        assert_eq!(back.goal_config[1].to_bits(), params.goal_config[1].to_bits());
        assert_eq!(back.extra_parameters, params.extra_parameters);
        assert_eq!(back.extension::<Knobs>().unwrap().unwrap().gain, 0.1 + 0.2);
        assert!(back.functions.state_space.is_none());
    }

    #[test]
    fn test_copy_from_keeps_functions() {
        let params = bound_params();
        let mut copy = PlannerParameters::new();
        copy.copy_from(&params).unwrap();
        assert_eq!(copy.initial_config, params.initial_config);
        assert!(copy.functions.state_space.is_some());
    }

    #[test]
    fn test_overlay_merges_fields() {
        let mut params = bound_params();
        params.set_extension(&Knobs::default()).unwrap();
        let merged = params
            .apply_overlay(r#"{"max_iterations": 77, "extensions": {"knobs": {"tries": 5}}}"#)
            .unwrap();
        assert_eq!(merged.max_iterations, 77);
        assert_eq!(merged.lower_limit, params.lower_limit);
        let knobs: Knobs = merged.extension_or_default().unwrap();
        assert_eq!(knobs, Knobs { gain: 0.5, tries: 5 });
        assert!(merged.functions.path_constraints.is_some());
        assert!(params.apply_overlay("[1, 2]").is_err());
        assert_eq!(params.apply_overlay("  ").unwrap().max_iterations, 0);
    }

    #[test]
    fn test_step_length_default() {
        let mut params = PlannerParameters::new();
        params.step_length = -1.0;
        assert_eq!(params.effective_step_length(), DEFAULT_STEP_LENGTH);
        params.step_length = 0.2;
        assert_eq!(params.effective_step_length(), 0.2);
    }
}
