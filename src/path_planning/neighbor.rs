//! Neighbor-state extension
//!
//! `q := Filter(q + qdelta)`: the proposed state is clamped to the position
//! limits, optionally projected onto a constraint manifold and written to the
//! live state. The sampling hint tightens the limits by a margin so new
//! tree nodes keep away from the hard boundary; the shortcutting and
//! smoothing hints keep `q + qdelta` whenever the hard limits allow it.

use std::rc::Rc;

use tracing::trace;

use crate::common::{
    LiveState, ManifoldProjection, NeighborStateFn, PlanningError, PlanningResult, StateSpace,
};
use crate::path_planning::options::{NeighborStateOptions, NeighborStateStatus};

/// Default margin, in units of resolution, kept from the limits under usage hints
pub const DEFAULT_SAMPLING_MARGIN: f64 = 0.5;

/// Neighbor function that clamps to limits and projects onto an optional manifold
pub struct LinearNeighborState {
    space: Rc<dyn StateSpace>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    resolution: Vec<f64>,
    projection: Option<Rc<dyn ManifoldProjection>>,
    sampling_margin: f64,
}

impl LinearNeighborState {
    pub fn new(
        space: Rc<dyn StateSpace>,
        lower: Vec<f64>,
        upper: Vec<f64>,
        resolution: Vec<f64>,
    ) -> PlanningResult<Self> {
        let dof = space.dof();
        PlanningError::check_len("lower limit", dof, lower.len())?;
        PlanningError::check_len("upper limit", dof, upper.len())?;
        PlanningError::check_len("resolution", dof, resolution.len())?;
        Ok(Self {
            space,
            lower,
            upper,
            resolution,
            projection: None,
            sampling_margin: DEFAULT_SAMPLING_MARGIN,
        })
    }

    pub fn with_projection(mut self, projection: Rc<dyn ManifoldProjection>) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sampling_margin(mut self, margin: f64) -> Self {
        self.sampling_margin = margin;
        self
    }

    fn margin(&self, i: usize, options: NeighborStateOptions) -> f64 {
        let sampling = options.contains(NeighborStateOptions::FROM_PATH_SAMPLING);
        if sampling && !options.contains(NeighborStateOptions::ONLY_HARD_CONSTRAINTS) {
            let half_range = 0.5 * (self.upper[i] - self.lower[i]).max(0.0);
            (self.sampling_margin * self.resolution[i]).min(half_range)
        } else {
            0.0
        }
    }
}

impl NeighborStateFn for LinearNeighborState {
    fn neighbor(
        &self,
        live: &mut LiveState,
        q: &mut Vec<f64>,
        qdelta: &[f64],
        options: NeighborStateOptions,
    ) -> PlanningResult<NeighborStateStatus> {
        let dof = self.space.dof();
        PlanningError::check_len("q", dof, q.len())?;
        PlanningError::check_len("qdelta", dof, qdelta.len())?;
        if qdelta.iter().all(|d| *d == 0.0) {
            return Ok(NeighborStateStatus::Reached);
        }

        let mut target = q.clone();
        self.space.add_state(&mut target, qdelta);

        let mut filtered = target.clone();
        for (i, v) in filtered.iter_mut().enumerate() {
            let margin = self.margin(i, options);
            *v = v.clamp(self.lower[i] + margin, self.upper[i] - margin);
        }

        if let Some(projection) = &self.projection {
            let sampling = options.contains(NeighborStateOptions::FROM_PATH_SAMPLING);
            if (sampling || !projection.is_satisfied(&filtered))
                && !projection.project(&mut filtered, options)
            {
                trace!("projection failed for {:?}", filtered);
                return Ok(NeighborStateStatus::Failed);
            }
        }

        match self.space.set_state(live, &filtered) {
            Ok(()) => {}
            Err(PlanningError::StateSetting(msg)) => {
                trace!("neighbor state rejected: {}", msg);
                return Ok(NeighborStateStatus::Failed);
            }
            Err(e) => return Err(e),
        }

        let status = if filtered == target {
            NeighborStateStatus::Reached
        } else {
            NeighborStateStatus::SuccessfulWithDeviation
        };
        *q = filtered;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plane;

    impl StateSpace for Plane {
        fn dof(&self) -> usize {
            2
        }

        fn get_state(&self, live: &LiveState, out: &mut Vec<f64>) {
            out.clear();
            out.extend_from_slice(&live.joint_values);
        }

        fn set_state(&self, live: &mut LiveState, values: &[f64]) -> PlanningResult<()> {
            live.joint_values.copy_from_slice(values);
            live.mark_updated();
            Ok(())
        }
    }

    /// Keeps the second coordinate at zero
    struct Axis;

    impl ManifoldProjection for Axis {
        fn is_satisfied(&self, q: &[f64]) -> bool {
            q[1] == 0.0
        }

        fn project(&self, q: &mut [f64], _options: NeighborStateOptions) -> bool {
            q[1] = 0.0;
            true
        }
    }

    fn extender() -> LinearNeighborState {
        LinearNeighborState::new(Rc::new(Plane), vec![-1.0, -1.0], vec![1.0, 1.0], vec![0.1, 0.1]).unwrap()
    }

    #[test]
    fn test_zero_delta_is_reached_and_unchanged() {
        let neighbor = extender();
        let mut live = LiveState::from_joint_values(vec![0.3, 0.2]);
        let mut q = vec![0.3, 0.2];
        let revision = live.revision();
        for options in [
            NeighborStateOptions::empty(),
            NeighborStateOptions::FROM_PATH_SAMPLING,
            NeighborStateOptions::GOAL_TO_INITIAL | NeighborStateOptions::ONLY_HARD_CONSTRAINTS,
        ] {
            let status = neighbor.neighbor(&mut live, &mut q, &[0.0, 0.0], options).unwrap();
            assert_eq!(status, NeighborStateStatus::Reached);
            assert_eq!(q, vec![0.3, 0.2]);
        }
        assert_eq!(live.revision(), revision);
    }

    #[test]
    fn test_free_step_is_reached() {
        let neighbor = extender();
        let mut live = LiveState::new(2);
        let mut q = vec![0.0, 0.0];
        let status = neighbor
            .neighbor(&mut live, &mut q, &[0.25, -0.5], NeighborStateOptions::empty())
            .unwrap();
        assert_eq!(status, NeighborStateStatus::Reached);
        assert_eq!(q, vec![0.25, -0.5]);
        assert_eq!(live.joint_values, q);
    }

    #[test]
    fn test_limit_clamp_is_deviation() {
        let neighbor = extender();
        let mut live = LiveState::new(2);
        let mut q = vec![0.9, 0.0];
        let status = neighbor
            .neighbor(&mut live, &mut q, &[0.5, 0.0], NeighborStateOptions::empty())
            .unwrap();
        assert_eq!(status, NeighborStateStatus::SuccessfulWithDeviation);
        assert_eq!(q[0], 1.0);
    }

    #[test]
    fn test_sampling_hint_keeps_margin_unless_hard_only() {
        let neighbor = extender();
        let mut live = LiveState::new(2);
        let mut q = vec![0.9, 0.0];
        neighbor
            .neighbor(&mut live, &mut q, &[0.5, 0.0], NeighborStateOptions::FROM_PATH_SAMPLING)
            .unwrap();
        assert!((q[0] - 0.95).abs() < 1e-12);

        let mut q = vec![0.9, 0.0];
        neighbor
            .neighbor(
                &mut live,
                &mut q,
                &[0.5, 0.0],
                NeighborStateOptions::FROM_PATH_SAMPLING | NeighborStateOptions::ONLY_HARD_CONSTRAINTS,
            )
            .unwrap();
        assert_eq!(q[0], 1.0);
    }

    #[test]
    fn test_shortcut_hint_reaches_limit() {
        let neighbor = extender();
        let mut live = LiveState::new(2);
        let mut q = vec![0.5, 0.0];
        let status = neighbor
            .neighbor(&mut live, &mut q, &[0.5, 0.0], NeighborStateOptions::FROM_PATH_SHORTCUTTING)
            .unwrap();
        assert_eq!(status, NeighborStateStatus::Reached);
        assert_eq!(q[0], 1.0);
    }

    #[test]
    fn test_projection_deviates() {
        let neighbor = extender().with_projection(Rc::new(Axis));
        let mut live = LiveState::new(2);
        let mut q = vec![0.0, 0.0];
        let status = neighbor
            .neighbor(&mut live, &mut q, &[0.2, 0.2], NeighborStateOptions::empty())
            .unwrap();
        assert_eq!(status, NeighborStateStatus::SuccessfulWithDeviation);
        assert_eq!(q, vec![0.2, 0.0]);
    }
}
