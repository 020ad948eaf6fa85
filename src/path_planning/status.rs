//! Planner status and result model
//!
//! A [`PlannerStatus`] is created fresh by every planning call. Besides the
//! status code it carries enough diagnostics to locate the cause of a failure
//! without reading logs: a description, the code location that produced it,
//! the offending collision report, IK target or joint values, and per-link
//! collision counters accumulated over the run.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::{CollisionReport, IkParameterization, PlanningResult};
use crate::path_planning::options::PlannerStatusCode;
use crate::path_planning::parameters::PlannerParameters;

/// Builds a [`PlannerStatus`] tagged with the calling file, line and module.
///
/// ```
/// use planner_core::planner_status;
/// use planner_core::path_planning::PlannerStatusCode;
///
/// let status = planner_status!("goal is in collision", PlannerStatusCode::FAILED_DUE_TO_GOAL);
/// assert!(status.error_origin.contains(file!()));
/// ```
#[macro_export]
macro_rules! planner_status {
    ($code:expr) => {
        $crate::path_planning::status::PlannerStatus::new($code)
            .with_error_origin(format!("[{}:{} {}]", file!(), line!(), module_path!()))
    };
    ($description:expr, $code:expr) => {
        $crate::path_planning::status::PlannerStatus::with_message($description, $code)
            .with_error_origin(format!("[{}:{} {}]", file!(), line!(), module_path!()))
    };
}

/// Outcome of a planning call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerStatus {
    /// parameters the planner ran with
    #[serde(skip)]
    pub parameters: Option<Rc<PlannerParameters>>,
    pub description: String,
    pub status_code: PlannerStatusCode,
    /// IK target that could not be solved
    pub ik_param: Option<IkParameterization>,
    /// joint values at the time of the failure
    pub joint_values: Vec<f64>,
    pub report: Option<CollisionReport>,
    /// code location that produced the status
    pub error_origin: String,
    /// number of collisions seen per (body, link)
    #[serde(with = "links_as_list")]
    pub colliding_links_count: BTreeMap<(String, String), u32>,
    pub num_planner_iterations: u32,
    pub elapsed_planning_time_us: u64,
}

impl PlannerStatus {
    /// Status with a generic description of `code`
    pub fn new(status_code: PlannerStatusCode) -> Self {
        Self {
            description: generic_description(status_code),
            status_code,
            ..Default::default()
        }
    }

    /// Status with a description; an empty description gets the generic one
    pub fn with_message(description: impl Into<String>, status_code: PlannerStatusCode) -> Self {
        let description = description.into();
        let mut status = Self::new(status_code);
        if !description.is_empty() {
            status.description = description;
        }
        status
    }

    pub fn with_report(mut self, report: CollisionReport) -> Self {
        self.init_collision_report(report);
        self
    }

    pub fn with_ik_param(mut self, ik_param: IkParameterization) -> Self {
        self.ik_param = Some(ik_param);
        self
    }

    pub fn with_joint_values(mut self, joint_values: Vec<f64>) -> Self {
        self.joint_values = joint_values;
        self
    }

    pub fn with_error_origin(mut self, origin: impl Into<String>) -> Self {
        self.error_origin = origin.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Option<Rc<PlannerParameters>>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_progress(mut self, iterations: u32, elapsed: Duration) -> Self {
        self.num_planner_iterations = iterations;
        self.elapsed_planning_time_us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self
    }

    pub fn status_code(&self) -> PlannerStatusCode {
        self.status_code
    }

    pub fn has_solution(&self) -> bool {
        self.status_code.contains(PlannerStatusCode::HAS_SOLUTION)
    }

    pub fn is_interrupted(&self) -> bool {
        self.status_code.contains(PlannerStatusCode::INTERRUPTED)
    }

    /// Sets the report and counts its colliding links
    pub fn init_collision_report(&mut self, report: CollisionReport) {
        self.add_collision_report(&report);
        self.report = Some(report);
    }

    /// Counts the colliding links of `report` without keeping it
    pub fn add_collision_report(&mut self, report: &CollisionReport) {
        for pair in &report.pairs {
            *self
                .colliding_links_count
                .entry((pair.body.clone(), pair.link.clone()))
                .or_insert(0) += 1;
            *self
                .colliding_links_count
                .entry((pair.other_body.clone(), pair.other_link.clone()))
                .or_insert(0) += 1;
        }
    }

    /// Folds the status of a post-processing run into this one.
    ///
    /// Only failure causes and counters are merged: the terminal class of
    /// `self` is kept.
    pub fn merge_post_processing(&mut self, hook: &PlannerStatus) {
        self.status_code |= hook.status_code.causes();
        for (key, count) in &hook.colliding_links_count {
            *self.colliding_links_count.entry(key.clone()).or_insert(0) += count;
        }
        self.num_planner_iterations = self
            .num_planner_iterations
            .saturating_add(hook.num_planner_iterations);
        self.elapsed_planning_time_us = self
            .elapsed_planning_time_us
            .saturating_add(hook.elapsed_planning_time_us);
    }

    /// Replaces the description with the generic one and drops diagnostics
    pub fn strip_detail(&mut self) {
        self.description = generic_description(self.status_code);
        self.report = None;
        self.ik_param = None;
        self.joint_values.clear();
        self.colliding_links_count.clear();
    }

    pub fn to_json(&self) -> PlanningResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> PlanningResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn cause_names(code: PlannerStatusCode) -> Vec<&'static str> {
    let mut names = Vec::new();
    let table = [
        (PlannerStatusCode::FAILED_DUE_TO_ENV_COLLISION, "environment collision"),
        (PlannerStatusCode::FAILED_DUE_TO_SELF_COLLISION, "self collision"),
        (PlannerStatusCode::FAILED_DUE_TO_INITIAL, "initial configuration"),
        (PlannerStatusCode::FAILED_DUE_TO_GOAL, "goal configuration"),
        (PlannerStatusCode::FAILED_DUE_TO_KINEMATICS, "kinematics"),
        (PlannerStatusCode::FAILED_DUE_TO_IK, "inverse kinematics"),
        (PlannerStatusCode::FAILED_DUE_TO_VELOCITY_CONSTRAINTS, "velocity constraints"),
        (PlannerStatusCode::FAILED_DUE_TO_CUSTOM_FILTER, "custom filter"),
        (PlannerStatusCode::FAILED_DUE_TO_TIME_BASED_CONSTRAINTS, "time-based constraints"),
    ];
    for (flag, name) in table {
        if code.contains(flag) {
            names.push(name);
        }
    }
    names
}

/// Description used when a status is created without one
pub fn generic_description(code: PlannerStatusCode) -> String {
    let head = if code.contains(PlannerStatusCode::INTERRUPTED_WITH_SOLUTION) {
        "planning was interrupted, but a solution was found"
    } else if code.contains(PlannerStatusCode::INTERRUPTED) {
        "planning was interrupted"
    } else if code.contains(PlannerStatusCode::HAS_SOLUTION) {
        "planning succeeded"
    } else {
        "planning failed"
    };
    let causes = cause_names(code);
    if causes.is_empty() {
        head.to_string()
    } else {
        format!("{} (causes: {})", head, causes.join(", "))
    }
}

/// JSON objects only take string keys, so the (body, link) map travels as a list
mod links_as_list {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Entry {
        body: String,
        link: String,
        count: u32,
    }

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<(String, String), u32>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<Entry> = map
            .iter()
            .map(|((body, link), count)| Entry {
                body: body.clone(),
                link: link.clone(),
                count: *count,
            })
            .collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<(String, String), u32>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|e| ((e.body, e.link), e.count))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CollisionPair;

    #[test]
    fn test_generic_description() {
        let status = PlannerStatus::new(PlannerStatusCode::FAILED_DUE_TO_GOAL);
        assert!(status.description.starts_with("planning failed"));
        assert!(status.description.contains("goal configuration"));
        let status = PlannerStatus::with_message("", PlannerStatusCode::HAS_SOLUTION);
        assert_eq!(status.description, "planning succeeded");
        assert!(status.has_solution());
    }

    #[test]
    fn test_macro_records_origin() {
        let status = planner_status!("custom", PlannerStatusCode::INTERRUPTED);
        assert_eq!(status.description, "custom");
        assert!(status.error_origin.contains("status.rs"));
        assert!(status.error_origin.contains(module_path!()));
        assert!(status.is_interrupted());
        assert!(!status.has_solution());
    }

    #[test]
    fn test_collision_counters_accumulate() {
        let mut report = CollisionReport::new();
        report.add_pair(CollisionPair::new("robot", "gripper", "table", "top"));
        let mut status = PlannerStatus::new(PlannerStatusCode::FAILED_DUE_TO_ENV_COLLISION).with_report(report.clone());
        status.add_collision_report(&report);
        let key = ("robot".to_string(), "gripper".to_string());
        assert_eq!(status.colliding_links_count[&key], 2);
        assert!(status.report.is_some());
    }

    #[test]
    fn test_merge_keeps_success() {
        let mut status = PlannerStatus::new(PlannerStatusCode::HAS_SOLUTION).with_progress(10, Duration::from_micros(5));
        let hook = PlannerStatus::new(PlannerStatusCode::FAILED_DUE_TO_SELF_COLLISION).with_progress(3, Duration::from_micros(2));
        status.merge_post_processing(&hook);
        assert!(status.has_solution());
        assert!(!status.is_interrupted());
        assert!(status.status_code.contains(PlannerStatusCode::FAILED_DUE_TO_SELF_COLLISION));
        assert_eq!(status.num_planner_iterations, 13);
        assert_eq!(status.elapsed_planning_time_us, 7);
    }

    #[test]
    fn test_status_json_round_trip() {
        let mut report = CollisionReport::new();
        report.add_pair(CollisionPair::new("robot", "link1", "box", "base"));
        report.min_distance = Some(0.125);
        let status = planner_status!("blocked", PlannerStatusCode::FAILED_DUE_TO_ENV_COLLISION)
            .with_report(report)
            .with_joint_values(vec![0.1, 1.0 / 3.0])
            .with_ik_param(IkParameterization::new("translation3d", vec![0.5, 0.0, 0.2]))
            .with_progress(42, Duration::from_millis(3));
        let json = status.to_json().unwrap();
        let back = PlannerStatus::from_json(&json).unwrap();
        assert_eq!(back.status_code, status.status_code);
        assert_eq!(back.description, status.description);
        assert_eq!(back.joint_values, status.joint_values);
        assert_eq!(back.colliding_links_count, status.colliding_links_count);
        assert_eq!(back.report, status.report);
        assert_eq!(back.ik_param, status.ik_param);
        assert_eq!(back.num_planner_iterations, 42);
        assert_eq!(back.elapsed_planning_time_us, 3000);
        assert!(back.parameters.is_none());
    }
}
