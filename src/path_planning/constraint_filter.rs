//! Constraint filter pipeline
//!
//! Validates a path segment between two configurations against a bitmask of
//! constraint classes: environment collisions, self collisions, time-based
//! limits and user constraints. The segment is discretized no coarser than the
//! per-DOF resolution, positions are interpolated through the state space's
//! difference/addition so circular DOFs wrap, and when boundary accelerations
//! are given each DOF follows a quintic instead of a line.
//!
//! Violations are reported as a [`ConstraintFilterOptions`] result code.
//! Only collaborator failures surface as `Err`.

use std::rc::Rc;

use itertools::izip;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::{
    CollisionChecker, CollisionReport, ConstraintVerdict, FilterSample, IntervalType, LiveState,
    NeighborStateFn, PathConstraintChecker, PlanningError, PlanningResult, SampleConstraint,
    StateSpace,
};
use crate::path_planning::options::{ConstraintFilterOptions, NeighborStateStatus};
use crate::path_planning::quintic_polynomials::QuinticInterpolation;

/// Fraction of the resolution used to jitter configurations in perturbation mode
pub const DEFAULT_PERTURBATION: f64 = 0.1;

/// Tolerance used when comparing the end of a corrected trace with q1
/// Velocity evaluations used to size quintic sampling
const QUINTIC_SPEED_SAMPLES: usize = 128;

const REACHED_EPSILON: f64 = 1e-9;

/// A path segment: boundary positions and velocities, optional boundary
/// accelerations and the time it takes to traverse
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub q0: &'a [f64],
    pub q1: &'a [f64],
    pub dq0: &'a [f64],
    pub dq1: &'a [f64],
    pub accelerations: Option<(&'a [f64], &'a [f64])>,
    /// seconds, 0 when the segment is untimed
    pub elapsed_time: f64,
}

impl<'a> Segment<'a> {
    pub fn new(
        q0: &'a [f64],
        q1: &'a [f64],
        dq0: &'a [f64],
        dq1: &'a [f64],
        elapsed_time: f64,
    ) -> Self {
        Self {
            q0,
            q1,
            dq0,
            dq1,
            accelerations: None,
            elapsed_time,
        }
    }

    pub fn with_accelerations(mut self, ddq0: &'a [f64], ddq1: &'a [f64]) -> Self {
        self.accelerations = Some((ddq0, ddq1));
        self
    }

    /// Checks every vector against the space dimension
    pub fn validate(&self, dof: usize) -> PlanningResult<()> {
        PlanningError::check_len("q0", dof, self.q0.len())?;
        PlanningError::check_len("q1", dof, self.q1.len())?;
        PlanningError::check_len("dq0", dof, self.dq0.len())?;
        PlanningError::check_len("dq1", dof, self.dq1.len())?;
        if let Some((ddq0, ddq1)) = self.accelerations {
            PlanningError::check_len("ddq0", dof, ddq0.len())?;
            PlanningError::check_len("ddq1", dof, ddq1.len())?;
        }
        if self.elapsed_time < 0.0 || self.elapsed_time.is_nan() {
            return Err(PlanningError::invalid_parameter(format!(
                "segment elapsed time must be non-negative, got {}",
                self.elapsed_time
            )));
        }
        Ok(())
    }
}

/// Reusable diagnostics of one segment check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintFilterReturn {
    /// checked configurations, flattened `N * dof`
    pub configurations: Vec<f64>,
    /// time (or interpolation parameter) of every checked configuration
    pub configuration_times: Vec<f64>,
    pub invalid_values: Vec<f64>,
    pub invalid_velocities: Vec<f64>,
    pub invalid_accelerations: Vec<f64>,
    pub time_when_invalid: f64,
    /// 0 when valid
    pub return_code: ConstraintFilterOptions,
    pub report: Option<CollisionReport>,
    /// a neighbor projection moved samples off the straight interpolation
    pub deviated_from_interpolation: bool,
    /// factor by which the segment time must scale to satisfy time-based limits
    pub time_based_surpass_mult: f64,
}

impl ConstraintFilterReturn {
    pub fn new() -> Self {
        Self {
            configurations: Vec::new(),
            configuration_times: Vec::new(),
            invalid_values: Vec::new(),
            invalid_velocities: Vec::new(),
            invalid_accelerations: Vec::new(),
            time_when_invalid: 0.0,
            return_code: ConstraintFilterOptions::empty(),
            report: None,
            deviated_from_interpolation: false,
            time_based_surpass_mult: 1.0,
        }
    }

    pub fn clear(&mut self) {
        self.configurations.clear();
        self.configuration_times.clear();
        self.invalid_values.clear();
        self.invalid_velocities.clear();
        self.invalid_accelerations.clear();
        self.time_when_invalid = 0.0;
        self.return_code = ConstraintFilterOptions::empty();
        self.report = None;
        self.deviated_from_interpolation = false;
        self.time_based_surpass_mult = 1.0;
    }

    pub fn is_valid(&self) -> bool {
        self.return_code.is_empty()
    }

    pub fn num_configurations(&self, dof: usize) -> usize {
        if dof == 0 {
            0
        } else {
            self.configurations.len() / dof
        }
    }

    pub fn configurations(&self, dof: usize) -> impl Iterator<Item = &[f64]> {
        self.configurations.chunks(dof.max(1))
    }
}

impl Default for ConstraintFilterReturn {
    fn default() -> Self {
        Self::new()
    }
}

/// Bookkeeping of one run over the samples of a segment
struct CheckRun {
    code: ConstraintFilterOptions,
    surpass: f64,
    deviated: bool,
    invalid_recorded: bool,
    trace: Vec<f64>,
    trace_times: Vec<f64>,
    invalid_values: Vec<f64>,
    invalid_velocities: Vec<f64>,
    invalid_accelerations: Vec<f64>,
    time_when_invalid: f64,
    report: Option<CollisionReport>,
}

impl CheckRun {
    fn new() -> Self {
        Self {
            code: ConstraintFilterOptions::empty(),
            surpass: 1.0,
            deviated: false,
            invalid_recorded: false,
            trace: Vec::new(),
            trace_times: Vec::new(),
            invalid_values: Vec::new(),
            invalid_velocities: Vec::new(),
            invalid_accelerations: Vec::new(),
            time_when_invalid: 0.0,
            report: None,
        }
    }

    fn record_sample(&mut self, q: &[f64], time: f64) {
        if !self.invalid_recorded {
            self.trace.extend_from_slice(q);
            self.trace_times.push(time);
        }
    }

    fn record_failure(
        &mut self,
        failures: ConstraintFilterOptions,
        sample: &FilterSample<'_>,
        report: Option<CollisionReport>,
    ) {
        self.code |= failures;
        if !self.invalid_recorded {
            self.invalid_recorded = true;
            self.invalid_values = sample.values.to_vec();
            self.invalid_velocities = sample.velocities.to_vec();
            self.invalid_accelerations = sample.accelerations.map(<[f64]>::to_vec).unwrap_or_default();
            self.time_when_invalid = sample.time;
        }
        if self.report.is_none() {
            self.report = report.filter(CollisionReport::is_colliding);
        }
    }

    fn finish(
        self,
        options: ConstraintFilterOptions,
        out: Option<&mut ConstraintFilterReturn>,
    ) -> ConstraintFilterOptions {
        if let Some(out) = out {
            if options.contains(ConstraintFilterOptions::FILL_CHECKED_CONFIGURATION) || self.deviated {
                out.configurations = self.trace;
                out.configuration_times = self.trace_times;
            }
            out.invalid_values = self.invalid_values;
            out.invalid_velocities = self.invalid_velocities;
            out.invalid_accelerations = self.invalid_accelerations;
            out.time_when_invalid = self.time_when_invalid;
            out.return_code = self.code;
            out.report = self.report;
            out.deviated_from_interpolation = self.deviated;
            out.time_based_surpass_mult = self.surpass;
        }
        self.code
    }
}

/// Default path constraint checker.
///
/// Collaborators are registered per class; an unregistered class passes.
pub struct ConstraintFilterPipeline {
    space: Rc<dyn StateSpace>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    resolution: Vec<f64>,
    collision: Option<Rc<dyn CollisionChecker>>,
    time_based: Vec<Rc<dyn SampleConstraint>>,
    user: Vec<Rc<dyn SampleConstraint>>,
    neighbor: Option<Rc<dyn NeighborStateFn>>,
    perturbation: f64,
}

impl ConstraintFilterPipeline {
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
        if let Some(r) = resolution.iter().find(|r| !(**r > 0.0)) {
            return Err(PlanningError::invalid_parameter(format!(
                "resolution must be positive, got {}",
                r
            )));
        }
        if let Some((lo, hi)) = lower
            .iter()
            .zip(&upper)
            .find(|(lo, hi)| !(lo.is_finite() && hi.is_finite() && lo <= hi))
        {
            return Err(PlanningError::invalid_parameter(format!(
                "limits [{}, {}] are not a finite range",
                lo, hi
            )));
        }
        Ok(Self {
            space,
            lower,
            upper,
            resolution,
            collision: None,
            time_based: Vec::new(),
            user: Vec::new(),
            neighbor: None,
            perturbation: DEFAULT_PERTURBATION,
        })
    }

    pub fn with_collision_checker(mut self, checker: Rc<dyn CollisionChecker>) -> Self {
        self.collision = Some(checker);
        self
    }

    pub fn with_time_based_constraint(mut self, constraint: Rc<dyn SampleConstraint>) -> Self {
        self.time_based.push(constraint);
        self
    }

    pub fn with_user_constraint(mut self, constraint: Rc<dyn SampleConstraint>) -> Self {
        self.user.push(constraint);
        self
    }

    /// Neighbor function stepped through when the options carry a usage hint
    pub fn with_neighbor_state(mut self, neighbor: Rc<dyn NeighborStateFn>) -> Self {
        self.neighbor = Some(neighbor);
        self
    }

    pub fn with_perturbation(mut self, perturbation: f64) -> Self {
        self.perturbation = perturbation;
        self
    }

    pub fn dof(&self) -> usize {
        self.space.dof()
    }

    /// Number of intervals the segment is cut into
    fn num_steps(&self, delta: &[f64]) -> usize {
        delta
            .iter()
            .zip(&self.resolution)
            .map(|(d, r)| (d.abs() / r).ceil() as usize)
            .max()
            .unwrap_or(0)
            .max(1)
    }

    /// Sets the live state. A state-setting failure becomes `Ok(false)`.
    fn set_live(&self, live: &mut LiveState, q: &[f64]) -> PlanningResult<bool> {
        match self.space.set_state(live, q) {
            Ok(()) => Ok(true),
            Err(PlanningError::StateSetting(msg)) => {
                warn!("failed to set state {:?}: {}", q, msg);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn collisions_at(
        &self,
        live: &LiveState,
        options: ConstraintFilterOptions,
        mut report: Option<&mut CollisionReport>,
    ) -> PlanningResult<ConstraintFilterOptions> {
        let mut failures = ConstraintFilterOptions::empty();
        let checker = match &self.collision {
            Some(checker) => checker,
            None => return Ok(failures),
        };
        let break_on_first = options.contains(ConstraintFilterOptions::BREAK_ON_FIRST_VALIDATION);
        if options.contains(ConstraintFilterOptions::CHECK_ENV_COLLISIONS)
            && checker.check_env_collision(live, report.as_deref_mut())?
        {
            failures |= ConstraintFilterOptions::CHECK_ENV_COLLISIONS;
            if break_on_first {
                return Ok(failures);
            }
        }
        if options.contains(ConstraintFilterOptions::CHECK_SELF_COLLISIONS)
            && checker.check_self_collision(live, report)?
        {
            failures |= ConstraintFilterOptions::CHECK_SELF_COLLISIONS;
        }
        Ok(failures)
    }

    /// Re-checks the collision classes with each DOF jittered by
    /// `perturbation * resolution` in both directions, then restores `q`
    fn perturbed_collisions(
        &self,
        live: &mut LiveState,
        q: &[f64],
        options: ConstraintFilterOptions,
    ) -> PlanningResult<ConstraintFilterOptions> {
        let mut failures = ConstraintFilterOptions::empty();
        let mut perturbed = q.to_vec();
        'outer: for i in 0..q.len() {
            for sign in [1.0, -1.0] {
                perturbed[i] = (q[i] + sign * self.perturbation * self.resolution[i])
                    .clamp(self.lower[i], self.upper[i]);
                if !self.set_live(live, &perturbed)? {
                    failures |= ConstraintFilterOptions::STATE_SETTING_ERROR;
                    break 'outer;
                }
                failures |= self.collisions_at(live, options, None)?;
                if options.contains(ConstraintFilterOptions::BREAK_ON_FIRST_VALIDATION)
                    && !failures.is_empty()
                {
                    break 'outer;
                }
            }
            perturbed[i] = q[i];
        }
        if !self.set_live(live, q)? {
            failures |= ConstraintFilterOptions::STATE_SETTING_ERROR;
        }
        Ok(failures)
    }

    fn sample_constraints(
        constraints: &[Rc<dyn SampleConstraint>],
        live: &LiveState,
        sample: &FilterSample<'_>,
        break_on_first: bool,
        surpass: &mut f64,
    ) -> PlanningResult<bool> {
        let mut violated = false;
        for constraint in constraints {
            if let ConstraintVerdict::Violated { surpass_multiplier } = constraint.check(live, sample)? {
                violated = true;
                if let Some(mult) = surpass_multiplier {
                    *surpass = surpass.min(mult);
                }
                if break_on_first {
                    break;
                }
            }
        }
        Ok(violated)
    }

    /// Evaluates the selected classes at one sample already set on `live`,
    /// in the order env, self, time-based, user
    fn evaluate_sample(
        &self,
        live: &mut LiveState,
        sample: &FilterSample<'_>,
        options: ConstraintFilterOptions,
        report: Option<&mut CollisionReport>,
        surpass: &mut f64,
    ) -> PlanningResult<ConstraintFilterOptions> {
        let break_on_first = options.contains(ConstraintFilterOptions::BREAK_ON_FIRST_VALIDATION);
        let mut failures = self.collisions_at(live, options, report)?;
        if break_on_first && !failures.is_empty() {
            return Ok(failures);
        }

        if options.contains(ConstraintFilterOptions::CHECK_WITH_PERTURBATION)
            && options.intersects(ConstraintFilterOptions::CHECK_COLLISIONS)
            && self.collision.is_some()
        {
            let perturbed = self.perturbed_collisions(live, sample.values, options)?;
            if break_on_first && !perturbed.is_empty() {
                return Ok(perturbed.iter().next().unwrap_or(perturbed));
            }
            failures |= perturbed;
        }

        if options.contains(ConstraintFilterOptions::CHECK_TIME_BASED_CONSTRAINTS)
            && Self::sample_constraints(&self.time_based, live, sample, break_on_first, surpass)?
        {
            failures |= ConstraintFilterOptions::CHECK_TIME_BASED_CONSTRAINTS;
            if break_on_first {
                return Ok(failures);
            }
        }

        if options.contains(ConstraintFilterOptions::CHECK_USER_CONSTRAINTS)
            && Self::sample_constraints(&self.user, live, sample, break_on_first, surpass)?
        {
            failures |= ConstraintFilterOptions::CHECK_USER_CONSTRAINTS;
        }
        Ok(failures)
    }

    /// Checks one sample and records it; returns true when the check must stop
    fn visit_sample(
        &self,
        live: &mut LiveState,
        sample: &FilterSample<'_>,
        options: ConstraintFilterOptions,
        run: &mut CheckRun,
    ) -> PlanningResult<bool> {
        let mut report = options
            .contains(ConstraintFilterOptions::FILL_COLLISION_REPORT)
            .then(CollisionReport::new);
        let failures = self.evaluate_sample(live, sample, options, report.as_mut(), &mut run.surpass)?;
        run.record_sample(sample.values, sample.time);
        if failures.is_empty() {
            return Ok(false);
        }
        debug!(
            "constraint violation {:?} at t={:.4} q={:?}",
            failures, sample.time, sample.values
        );
        run.record_failure(failures, sample, report);
        Ok(options.contains(ConstraintFilterOptions::BREAK_ON_FIRST_VALIDATION))
    }
}

impl PathConstraintChecker for ConstraintFilterPipeline {
    fn check_segment(
        &self,
        live: &mut LiveState,
        segment: &Segment<'_>,
        interval: IntervalType,
        options: ConstraintFilterOptions,
        mut out: Option<&mut ConstraintFilterReturn>,
    ) -> PlanningResult<ConstraintFilterOptions> {
        let dof = self.space.dof();
        segment.validate(dof)?;
        if let Some(out) = out.as_deref_mut() {
            out.clear();
        }

        let mut run = CheckRun::new();
        if !self.set_live(live, segment.q0)? {
            run.code = ConstraintFilterOptions::STATE_SETTING_ERROR;
            return Ok(run.finish(options, out));
        }

        let mut delta = segment.q1.to_vec();
        self.space.diff_state(&mut delta, segment.q0);
        let timed = segment.elapsed_time > 0.0;
        let zero = vec![0.0; dof];

        if delta.iter().all(|d| *d == 0.0) {
            if interval != IntervalType::OpenBoth {
                let sample = FilterSample {
                    values: segment.q0,
                    velocities: segment.dq0,
                    accelerations: segment.accelerations.map(|(ddq0, _)| ddq0),
                    jerks: None,
                    time: 0.0,
                };
                self.visit_sample(live, &sample, options, &mut run)?;
            }
            return Ok(run.finish(options, out));
        }

        let quintic = match segment.accelerations {
            Some((ddq0, ddq1)) if timed => QuinticInterpolation::new(
                &delta,
                segment.dq0,
                segment.dq1,
                ddq0,
                ddq1,
                segment.elapsed_time,
            ),
            _ => None,
        };
        // a curve can overshoot q1, so bound each step by the peak speed
        let steps = match &quintic {
            Some(quintic) => {
                let reach: Vec<f64> = quintic
                    .peak_speeds(QUINTIC_SPEED_SAMPLES)
                    .iter()
                    .map(|v| v * segment.elapsed_time)
                    .collect();
                self.num_steps(&delta).max(self.num_steps(&reach))
            }
            None => self.num_steps(&delta),
        };
        let linear_acc: Option<Vec<f64>> = timed.then(|| {
            izip!(segment.dq0, segment.dq1)
                .map(|(v0, v1)| (v1 - v0) / segment.elapsed_time)
                .collect()
        });
        let extender = self.neighbor.as_ref().filter(|_| options.has_usage_hint());
        let neighbor_options = options.neighbor_options();

        let mut nominal = segment.q0.to_vec();
        let mut current = segment.q0.to_vec();
        let mut offset = zero.clone();
        let mut vel = zero.clone();
        let mut acc = zero.clone();
        let mut jerk = zero.clone();
        let mut qdelta = zero;

        for k in 0..=steps {
            let s = k as f64 / steps as f64;
            let time = if timed { s * segment.elapsed_time } else { s };

            nominal.copy_from_slice(segment.q0);
            if let Some(quintic) = &quintic {
                quintic.eval(time, &mut offset, &mut vel, &mut acc, &mut jerk);
            } else {
                for (o, d) in offset.iter_mut().zip(&delta) {
                    *o = s * d;
                }
                for (v, v0, v1) in izip!(vel.iter_mut(), segment.dq0, segment.dq1) {
                    *v = v0 + s * (v1 - v0);
                }
            }
            self.space.add_state(&mut nominal, &offset);

            if k > 0 {
                if let Some(extender) = extender {
                    qdelta.copy_from_slice(&nominal);
                    self.space.diff_state(&mut qdelta, &current);
                    match extender.neighbor(live, &mut current, &qdelta, neighbor_options) {
                        Ok(NeighborStateStatus::Failed) | Err(PlanningError::StateSetting(_)) => {
                            debug!("neighbor extension failed at step {}/{}", k, steps);
                            run.code |= ConstraintFilterOptions::STATE_SETTING_ERROR;
                            return Ok(run.finish(options, out));
                        }
                        Ok(NeighborStateStatus::SuccessfulWithDeviation) => run.deviated = true,
                        Ok(NeighborStateStatus::Reached) => {}
                        Err(e) => return Err(e),
                    }
                } else {
                    current.copy_from_slice(&nominal);
                    if !self.set_live(live, &current)? {
                        run.code |= ConstraintFilterOptions::STATE_SETTING_ERROR;
                        return Ok(run.finish(options, out));
                    }
                }
            }

            let included = (k > 0 || interval.includes_start()) && (k < steps || interval.includes_end());
            if !included {
                continue;
            }
            let sample = FilterSample {
                values: &current,
                velocities: &vel,
                accelerations: if quintic.is_some() {
                    Some(acc.as_slice())
                } else {
                    linear_acc.as_deref()
                },
                jerks: quintic.as_ref().map(|_| jerk.as_slice()),
                time,
            };
            if self.visit_sample(live, &sample, options, &mut run)? {
                return Ok(run.finish(options, out));
            }
        }

        if extender.is_some() && self.space.distance(&current, segment.q1) > REACHED_EPSILON {
            debug!("corrected trace ended away from q1");
            run.code |= ConstraintFilterOptions::FINAL_VALUES_NOT_REACHED;
        }
        Ok(run.finish(options, out))
    }
}

/// Per-DOF velocity, acceleration and jerk limits as a time-based constraint.
///
/// A non-positive limit leaves that DOF unconstrained.
#[derive(Debug, Clone)]
pub struct DofLimitConstraint {
    pub velocity_limit: Vec<f64>,
    pub acceleration_limit: Vec<f64>,
    pub jerk_limit: Vec<f64>,
}

impl DofLimitConstraint {
    pub fn new(velocity_limit: Vec<f64>, acceleration_limit: Vec<f64>, jerk_limit: Vec<f64>) -> Self {
        Self {
            velocity_limit,
            acceleration_limit,
            jerk_limit,
        }
    }

    /// Smallest time scaling that brings `values` within `limits`
    fn surpass(values: &[f64], limits: &[f64], root: impl Fn(f64) -> f64) -> Option<f64> {
        values
            .iter()
            .zip(limits)
            .filter(|(v, lim)| **lim > 0.0 && v.abs() > **lim * (1.0 + 1e-9))
            .map(|(v, lim)| root(lim / v.abs()))
            .reduce(f64::min)
    }
}

impl SampleConstraint for DofLimitConstraint {
    fn check(&self, _live: &LiveState, sample: &FilterSample<'_>) -> PlanningResult<ConstraintVerdict> {
        let mut mult: Option<f64> = Self::surpass(sample.velocities, &self.velocity_limit, |r| r);
        if let Some(acc) = sample.accelerations {
            if let Some(m) = Self::surpass(acc, &self.acceleration_limit, f64::sqrt) {
                mult = Some(mult.map_or(m, |x| x.min(m)));
            }
        }
        if let Some(jerk) = sample.jerks {
            if let Some(m) = Self::surpass(jerk, &self.jerk_limit, f64::cbrt) {
                mult = Some(mult.map_or(m, |x| x.min(m)));
            }
        }
        Ok(match mult {
            Some(m) => ConstraintVerdict::Violated {
                surpass_multiplier: Some(m),
            },
            None => ConstraintVerdict::Valid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{CollisionPair, ManifoldProjection};
    use crate::path_planning::neighbor::LinearNeighborState;
    use crate::path_planning::options::NeighborStateOptions;

    struct Line;

    impl StateSpace for Line {
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

    /// Collides when the first joint is inside [lo, hi]
    struct Band {
        lo: f64,
        hi: f64,
    }

    impl CollisionChecker for Band {
        fn check_env_collision(
            &self,
            live: &LiveState,
            report: Option<&mut CollisionReport>,
        ) -> PlanningResult<bool> {
            let x = live.joint_values[0];
            let hit = x >= self.lo && x <= self.hi;
            if hit {
                if let Some(report) = report {
                    report.add_pair(CollisionPair::new("robot", "base", "wall", "band"));
                }
            }
            Ok(hit)
        }
    }

    /// Violated when the second joint is negative
    struct NonNegative;

    impl SampleConstraint for NonNegative {
        fn check(&self, _live: &LiveState, sample: &FilterSample<'_>) -> PlanningResult<ConstraintVerdict> {
            Ok(if sample.values[1] < 0.0 {
                ConstraintVerdict::Violated {
                    surpass_multiplier: None,
                }
            } else {
                ConstraintVerdict::Valid
            })
        }
    }

    fn pipeline() -> ConstraintFilterPipeline {
        ConstraintFilterPipeline::new(
            Rc::new(Line),
            vec![-10.0, -10.0],
            vec![10.0, 10.0],
            vec![0.1, 0.1],
        )
        .unwrap()
    }

    #[test]
    fn test_free_segment_is_valid_and_traced() {
        let filter = pipeline();
        let mut live = LiveState::new(2);
        let mut out = ConstraintFilterReturn::new();
        let zero = [0.0, 0.0];
        let segment = Segment::new(&[0.0, 0.0], &[1.0, 0.5], &zero, &zero, 0.0);
        let options = ConstraintFilterOptions::RECOMMENDED | ConstraintFilterOptions::FILL_CHECKED_CONFIGURATION;
        let code = filter
            .check_segment(&mut live, &segment, IntervalType::Closed, options, Some(&mut out))
            .unwrap();
        assert!(code.is_empty());
        assert_eq!(out.num_configurations(2), 11);
        assert_eq!(out.configurations(2).last().unwrap(), &[1.0, 0.5]);
        assert_eq!(live.joint_values, vec![1.0, 0.5]);
    }

    #[test]
    fn test_open_start_skips_q0() {
        let filter = pipeline().with_collision_checker(Rc::new(Band { lo: -0.05, hi: 0.05 }));
        let mut live = LiveState::new(2);
        let zero = [0.0, 0.0];
        let segment = Segment::new(&[0.0, 0.0], &[1.0, 0.0], &zero, &zero, 0.0);
        let options = ConstraintFilterOptions::RECOMMENDED;
        let open = filter
            .check_segment(&mut live, &segment, IntervalType::OpenStart, options, None)
            .unwrap();
        assert!(open.is_empty());
        let closed = filter
            .check_segment(&mut live, &segment, IntervalType::Closed, options, None)
            .unwrap();
        assert_eq!(closed, ConstraintFilterOptions::CHECK_ENV_COLLISIONS);
    }

    #[test]
    fn test_trace_stops_at_first_invalid_sample() {
        let filter = pipeline().with_collision_checker(Rc::new(Band { lo: 0.45, hi: 0.55 }));
        let mut live = LiveState::new(2);
        let mut out = ConstraintFilterReturn::new();
        let zero = [0.0, 0.0];
        let segment = Segment::new(&[0.0, 0.0], &[1.0, 0.0], &zero, &zero, 0.0);
        let options = ConstraintFilterOptions::RECOMMENDED
            | ConstraintFilterOptions::FILL_CHECKED_CONFIGURATION
            | ConstraintFilterOptions::FILL_COLLISION_REPORT;
        let code = filter
            .check_segment(&mut live, &segment, IntervalType::Closed, options, Some(&mut out))
            .unwrap();
        assert_eq!(code, ConstraintFilterOptions::CHECK_ENV_COLLISIONS);
        assert_eq!(out.return_code, code);
        assert!((out.invalid_values[0] - 0.5).abs() < 1e-9);
        assert!((out.time_when_invalid - 0.5).abs() < 1e-9);
        assert_eq!(out.num_configurations(2), 6);
        assert!(out.report.as_ref().unwrap().is_colliding());
    }

    #[test]
    fn test_break_on_first_reports_single_class() {
        let filter = pipeline()
            .with_collision_checker(Rc::new(Band { lo: 0.45, hi: 0.55 }))
            .with_user_constraint(Rc::new(NonNegative));
        let mut live = LiveState::new(2);
        let zero = [0.0, 0.0];
        let segment = Segment::new(&[0.0, -1.0], &[1.0, -1.0], &zero, &zero, 0.0);
        let full = filter
            .check_segment(&mut live, &segment, IntervalType::Closed, ConstraintFilterOptions::RECOMMENDED, None)
            .unwrap();
        assert_eq!(
            full,
            ConstraintFilterOptions::CHECK_ENV_COLLISIONS | ConstraintFilterOptions::CHECK_USER_CONSTRAINTS
        );
        let first = filter
            .check_segment(
                &mut live,
                &segment,
                IntervalType::Closed,
                ConstraintFilterOptions::RECOMMENDED | ConstraintFilterOptions::BREAK_ON_FIRST_VALIDATION,
                None,
            )
            .unwrap();
        assert_eq!(first.bits().count_ones(), 1);
        assert!(full.contains(first));
    }

    #[test]
    fn test_perturbation_catches_grazing_contact() {
        let filter = pipeline().with_collision_checker(Rc::new(Band { lo: 1.005, hi: 2.0 }));
        let mut live = LiveState::new(2);
        let zero = [0.0, 0.0];
        let segment = Segment::new(&[0.0, 0.0], &[1.0, 0.0], &zero, &zero, 0.0);
        let plain = filter
            .check_segment(&mut live, &segment, IntervalType::Closed, ConstraintFilterOptions::RECOMMENDED, None)
            .unwrap();
        assert!(plain.is_empty());
        let perturbed = filter
            .check_segment(
                &mut live,
                &segment,
                IntervalType::Closed,
                ConstraintFilterOptions::RECOMMENDED | ConstraintFilterOptions::CHECK_WITH_PERTURBATION,
                None,
            )
            .unwrap();
        assert_eq!(perturbed, ConstraintFilterOptions::CHECK_ENV_COLLISIONS);
        assert_eq!(live.joint_values[0], 1.0);
    }

    #[test]
    fn test_time_based_surpass_multiplier() {
        let filter = pipeline().with_time_based_constraint(Rc::new(DofLimitConstraint::new(
            vec![1.0, 1.0],
            vec![0.0, 0.0],
            vec![0.0, 0.0],
        )));
        let mut live = LiveState::new(2);
        let mut out = ConstraintFilterReturn::new();
        let v = [2.0, 0.5];
        let segment = Segment::new(&[0.0, 0.0], &[1.0, 0.25], &v, &v, 0.5);
        let code = filter
            .check_segment(&mut live, &segment, IntervalType::Closed, ConstraintFilterOptions::RECOMMENDED, Some(&mut out))
            .unwrap();
        assert_eq!(code, ConstraintFilterOptions::CHECK_TIME_BASED_CONSTRAINTS);
        assert!((out.time_based_surpass_mult - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_quintic_segment_reaches_q1() {
        let filter = pipeline();
        let mut live = LiveState::new(2);
        let mut out = ConstraintFilterReturn::new();
        let zero = [0.0, 0.0];
        let segment = Segment::new(&[0.0, 0.0], &[0.5, -0.5], &zero, &zero, 1.0).with_accelerations(&zero, &zero);
        let code = filter
            .check_segment(
                &mut live,
                &segment,
                IntervalType::Closed,
                ConstraintFilterOptions::RECOMMENDED | ConstraintFilterOptions::FILL_CHECKED_CONFIGURATION,
                Some(&mut out),
            )
            .unwrap();
        assert!(code.is_empty());
        let last = out.configurations(2).last().unwrap();
        assert!((last[0] - 0.5).abs() < 1e-9);
        assert!((last[1] + 0.5).abs() < 1e-9);
        assert!((out.configuration_times.last().unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_overshooting_quintic_is_sampled_densely() {
        let filter = pipeline().with_collision_checker(Rc::new(Band { lo: 0.3, hi: 0.5 }));
        let mut live = LiveState::new(2);
        let mut out = ConstraintFilterReturn::new();
        let v = [3.0, 0.0];
        let zero = [0.0, 0.0];
        // peaks near x = 0.45 before coming back to 0.1
        let segment = Segment::new(&[0.0, 0.0], &[0.1, 0.0], &v, &v, 1.0).with_accelerations(&zero, &zero);
        let code = filter
            .check_segment(&mut live, &segment, IntervalType::Closed, ConstraintFilterOptions::RECOMMENDED, Some(&mut out))
            .unwrap();
        assert_eq!(code, ConstraintFilterOptions::CHECK_ENV_COLLISIONS);
        assert!(out.invalid_values[0] >= 0.3 && out.invalid_values[0] <= 0.5);
    }

    /// Keeps the second joint on y = x^2
    struct Parabola;

    impl ManifoldProjection for Parabola {
        fn is_satisfied(&self, q: &[f64]) -> bool {
            (q[1] - q[0] * q[0]).abs() < 1e-12
        }

        fn project(&self, q: &mut [f64], _options: NeighborStateOptions) -> bool {
            q[1] = q[0] * q[0];
            true
        }
    }

    struct Unreachable;

    impl ManifoldProjection for Unreachable {
        fn is_satisfied(&self, _q: &[f64]) -> bool {
            false
        }

        fn project(&self, _q: &mut [f64], _options: NeighborStateOptions) -> bool {
            false
        }
    }

    fn extender(upper: Vec<f64>) -> LinearNeighborState {
        LinearNeighborState::new(Rc::new(Line), vec![-10.0, -10.0], upper, vec![0.1, 0.1]).unwrap()
    }

    #[test]
    fn test_projected_stepping_keeps_deviated_trace() {
        let filter = pipeline().with_neighbor_state(Rc::new(
            extender(vec![10.0, 10.0]).with_projection(Rc::new(Parabola)),
        ));
        let mut live = LiveState::new(2);
        let mut out = ConstraintFilterReturn::new();
        let zero = [0.0, 0.0];
        let segment = Segment::new(&[0.0, 0.0], &[1.0, 1.0], &zero, &zero, 0.0);
        let options = ConstraintFilterOptions::RECOMMENDED | ConstraintFilterOptions::FROM_PATH_SHORTCUTTING;
        let code = filter
            .check_segment(&mut live, &segment, IntervalType::Closed, options, Some(&mut out))
            .unwrap();
        assert!(code.is_empty());
        assert!(out.deviated_from_interpolation);
        // filled without FILL_CHECKED_CONFIGURATION because the path deviated
        assert_eq!(out.num_configurations(2), 11);
        let middle = out.configurations(2).nth(5).unwrap();
        assert!((middle[0] - 0.5).abs() < 1e-9);
        assert!((middle[1] - 0.25).abs() < 1e-9);
        assert!((live.joint_values[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_clamped_stepping_misses_q1() {
        let filter = pipeline().with_neighbor_state(Rc::new(extender(vec![0.5, 10.0])));
        let mut live = LiveState::new(2);
        let mut out = ConstraintFilterReturn::new();
        let zero = [0.0, 0.0];
        let segment = Segment::new(&[0.0, 0.0], &[1.0, 0.0], &zero, &zero, 0.0);
        let options = ConstraintFilterOptions::RECOMMENDED | ConstraintFilterOptions::FROM_PATH_SHORTCUTTING;
        let code = filter
            .check_segment(&mut live, &segment, IntervalType::Closed, options, Some(&mut out))
            .unwrap();
        assert_eq!(code, ConstraintFilterOptions::FINAL_VALUES_NOT_REACHED);
        assert!(out.deviated_from_interpolation);
        assert_eq!(live.joint_values[0], 0.5);
    }

    #[test]
    fn test_failed_neighbor_is_state_setting_error() {
        let filter = pipeline().with_neighbor_state(Rc::new(
            extender(vec![10.0, 10.0]).with_projection(Rc::new(Unreachable)),
        ));
        let mut live = LiveState::new(2);
        let zero = [0.0, 0.0];
        let segment = Segment::new(&[0.0, 0.0], &[1.0, 0.0], &zero, &zero, 0.0);
        let code = filter
            .check_segment(
                &mut live,
                &segment,
                IntervalType::Closed,
                ConstraintFilterOptions::RECOMMENDED | ConstraintFilterOptions::FROM_PATH_SHORTCUTTING,
                None,
            )
            .unwrap();
        assert_eq!(code, ConstraintFilterOptions::STATE_SETTING_ERROR);
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let filter = pipeline();
        let mut live = LiveState::new(2);
        let zero = [0.0, 0.0];
        let segment = Segment::new(&[0.0], &[1.0, 0.0], &zero, &zero, 0.0);
        let result = filter.check_segment(&mut live, &segment, IntervalType::Closed, ConstraintFilterOptions::RECOMMENDED, None);
        assert!(matches!(result, Err(PlanningError::DimensionMismatch { what: "q0", .. })));
    }
}
