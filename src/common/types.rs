//! Common types used throughout planner_core

use serde::{Deserialize, Serialize};

use crate::common::error::{PlanningError, PlanningResult};

/// Which endpoints of a segment are themselves checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalType {
    /// both q0 and q1 are checked
    Closed,
    /// q0 is skipped
    OpenStart,
    /// q1 is skipped
    OpenEnd,
    /// neither endpoint is checked
    OpenBoth,
}

impl IntervalType {
    pub fn includes_start(self) -> bool {
        matches!(self, IntervalType::Closed | IntervalType::OpenEnd)
    }

    pub fn includes_end(self) -> bool {
        matches!(self, IntervalType::Closed | IntervalType::OpenStart)
    }
}

/// Explicit handle on the live robot state.
///
/// Every state-setting, filtering and extension call receives this handle
/// instead of touching shared robot state, so independent sessions can run
/// against independent handles.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiveState {
    pub joint_values: Vec<f64>,
    pub joint_velocities: Vec<f64>,
    /// x, y, z, yaw
    pub affine: [f64; 4],
    pub affine_velocity: [f64; 4],
    revision: u64,
}

impl LiveState {
    pub fn new(num_joints: usize) -> Self {
        Self {
            joint_values: vec![0.0; num_joints],
            joint_velocities: vec![0.0; num_joints],
            ..Default::default()
        }
    }

    pub fn from_joint_values(values: Vec<f64>) -> Self {
        let n = values.len();
        Self {
            joint_values: values,
            joint_velocities: vec![0.0; n],
            ..Default::default()
        }
    }

    pub fn num_joints(&self) -> usize {
        self.joint_values.len()
    }

    /// Number of writes since creation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn mark_updated(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Copies every value of `saved` back, counting it as a write
    pub fn restore_from(&mut self, saved: &LiveState) {
        self.joint_values.clone_from(&saved.joint_values);
        self.joint_velocities.clone_from(&saved.joint_velocities);
        self.affine = saved.affine;
        self.affine_velocity = saved.affine_velocity;
        self.mark_updated();
    }
}

/// One sample handed to per-sample constraint evaluators
#[derive(Debug, Clone, Copy)]
pub struct FilterSample<'a> {
    pub values: &'a [f64],
    pub velocities: &'a [f64],
    pub accelerations: Option<&'a [f64]>,
    pub jerks: Option<&'a [f64]>,
    /// seconds if an elapsed time was given, otherwise the interpolation parameter in [0, 1]
    pub time: f64,
}

/// A pair of colliding (body, link) identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollisionPair {
    pub body: String,
    pub link: String,
    pub other_body: String,
    pub other_link: String,
}

impl CollisionPair {
    pub fn new(body: &str, link: &str, other_body: &str, other_link: &str) -> Self {
        Self {
            body: body.to_string(),
            link: link.to_string(),
            other_body: other_body.to_string(),
            other_link: other_link.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub position: [f64; 3],
    pub normal: [f64; 3],
    pub depth: f64,
}

/// Diagnostic record filled by the collision collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionReport {
    pub pairs: Vec<CollisionPair>,
    pub contacts: Vec<Contact>,
    /// closest distance seen by the checker, if it computes one
    pub min_distance: Option<f64>,
}

impl CollisionReport {
    pub fn new() -> Self {
        Self {
            pairs: Vec::new(),
            contacts: Vec::new(),
            min_distance: None,
        }
    }

    pub fn reset(&mut self) {
        self.pairs.clear();
        self.contacts.clear();
        self.min_distance = None;
    }

    pub fn is_colliding(&self) -> bool {
        !self.pairs.is_empty()
    }

    pub fn add_pair(&mut self, pair: CollisionPair) {
        self.pairs.push(pair);
    }
}

impl Default for CollisionReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Inverse-kinematics target that could not be solved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IkParameterization {
    pub kind: String,
    pub values: Vec<f64>,
}

impl IkParameterization {
    pub fn new(kind: &str, values: Vec<f64>) -> Self {
        Self {
            kind: kind.to_string(),
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Waypoint {
    pub values: Vec<f64>,
    pub velocities: Vec<f64>,
    /// time from the previous waypoint [s]
    pub delta_time: f64,
}

/// Planned path as an ordered waypoint sequence
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trajectory {
    dof: usize,
    waypoints: Vec<Waypoint>,
}

impl Trajectory {
    pub fn new(dof: usize) -> Self {
        Self {
            dof,
            waypoints: Vec::new(),
        }
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    /// Resets the waypoints and adopts a new dimension
    pub fn reset(&mut self, dof: usize) {
        self.dof = dof;
        self.waypoints.clear();
    }

    pub fn push(&mut self, values: &[f64]) -> PlanningResult<()> {
        PlanningError::check_len("waypoint", self.dof, values.len())?;
        self.waypoints.push(Waypoint {
            values: values.to_vec(),
            velocities: vec![0.0; self.dof],
            delta_time: 0.0,
        });
        Ok(())
    }

    pub fn push_waypoint(&mut self, waypoint: Waypoint) -> PlanningResult<()> {
        PlanningError::check_len("waypoint", self.dof, waypoint.values.len())?;
        self.waypoints.push(waypoint);
        Ok(())
    }

    pub fn insert(&mut self, index: usize, waypoint: Waypoint) -> PlanningResult<()> {
        PlanningError::check_len("waypoint", self.dof, waypoint.values.len())?;
        if index > self.waypoints.len() {
            return Err(PlanningError::invalid_parameter(format!(
                "waypoint index {} past the end of a trajectory with {} waypoints",
                index,
                self.waypoints.len()
            )));
        }
        self.waypoints.insert(index, waypoint);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn clear(&mut self) {
        self.waypoints.clear();
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn waypoints_mut(&mut self) -> &mut [Waypoint] {
        &mut self.waypoints
    }

    pub fn first(&self) -> Option<&Waypoint> {
        self.waypoints.first()
    }

    pub fn last(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }

    pub fn configurations(&self) -> impl Iterator<Item = &[f64]> {
        self.waypoints.iter().map(|w| w.values.as_slice())
    }

    pub fn duration(&self) -> f64 {
        self.waypoints.iter().map(|w| w.delta_time).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_endpoints() {
        assert!(IntervalType::Closed.includes_start());
        assert!(IntervalType::Closed.includes_end());
        assert!(!IntervalType::OpenStart.includes_start());
        assert!(IntervalType::OpenStart.includes_end());
        assert!(IntervalType::OpenEnd.includes_start());
        assert!(!IntervalType::OpenBoth.includes_end());
    }

    #[test]
    fn test_trajectory_rejects_wrong_dof() {
        let mut traj = Trajectory::new(2);
        assert!(traj.push(&[0.0, 1.0]).is_ok());
        assert!(traj.push(&[0.0]).is_err());
        assert_eq!(traj.len(), 1);
    }

    #[test]
    fn test_collision_report_reset() {
        let mut report = CollisionReport::new();
        report.add_pair(CollisionPair::new("robot", "link1", "table", "top"));
        report.min_distance = Some(0.0);
        assert!(report.is_colliding());
        report.reset();
        assert!(!report.is_colliding());
        assert!(report.min_distance.is_none());
    }
}
