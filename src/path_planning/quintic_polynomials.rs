//! Quintic polynomial interpolation between two boundary states
//!
//! Used by the constraint filter when a segment carries boundary
//! accelerations: each DOF follows its own quintic so positions, velocities,
//! accelerations and jerk at every sample come from the polynomial.

use itertools::izip;
use nalgebra::{Matrix3, Vector3};

/// One-dimensional quintic `x(t) = a0 + a1 t + ... + a5 t^5`
#[derive(Debug, Clone, PartialEq)]
pub struct QuinticPolynomial {
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
    pub a3: f64,
    pub a4: f64,
    pub a5: f64,
}

impl QuinticPolynomial {
    /// Fits the polynomial matching position, velocity and acceleration at
    /// `t = 0` and `t = time`. Returns `None` when `time` is not positive.
    pub fn new(xs: f64, vxs: f64, axs: f64, xe: f64, vxe: f64, axe: f64, time: f64) -> Option<Self> {
        if !(time > 0.0) {
            return None;
        }
        let a0 = xs;
        let a1 = vxs;
        let a2 = axs / 2.0;

        let t2 = time * time;
        let t3 = t2 * time;
        let t4 = t3 * time;
        let t5 = t4 * time;

        let a = Matrix3::new(
            t3, t4, t5,
            3.0 * t2, 4.0 * t3, 5.0 * t4,
            6.0 * time, 12.0 * t2, 20.0 * t3,
        );
        let b = Vector3::new(
            xe - a0 - a1 * time - a2 * t2,
            vxe - a1 - 2.0 * a2 * time,
            axe - 2.0 * a2,
        );
        let x = a.lu().solve(&b)?;

        Some(QuinticPolynomial {
            a0,
            a1,
            a2,
            a3: x[0],
            a4: x[1],
            a5: x[2],
        })
    }

    pub fn calc_point(&self, t: f64) -> f64 {
        self.a0 + self.a1 * t + self.a2 * t.powi(2) +
        self.a3 * t.powi(3) + self.a4 * t.powi(4) + self.a5 * t.powi(5)
    }

    pub fn calc_first_derivative(&self, t: f64) -> f64 {
        self.a1 + 2.0 * self.a2 * t +
        3.0 * self.a3 * t.powi(2) + 4.0 * self.a4 * t.powi(3) + 5.0 * self.a5 * t.powi(4)
    }

    pub fn calc_second_derivative(&self, t: f64) -> f64 {
        2.0 * self.a2 + 6.0 * self.a3 * t +
        12.0 * self.a4 * t.powi(2) + 20.0 * self.a5 * t.powi(3)
    }

    pub fn calc_third_derivative(&self, t: f64) -> f64 {
        6.0 * self.a3 + 24.0 * self.a4 * t + 60.0 * self.a5 * t.powi(2)
    }
}

/// Per-DOF quintic interpolation of a whole segment.
///
/// Polynomials are fitted on the displacement `delta = q1 - q0` (already
/// wrapped for circular DOFs) so the caller can add the result back onto q0.
#[derive(Debug, Clone)]
pub struct QuinticInterpolation {
    polys: Vec<QuinticPolynomial>,
    duration: f64,
}

impl QuinticInterpolation {
    pub fn new(
        delta: &[f64],
        dq0: &[f64],
        dq1: &[f64],
        ddq0: &[f64],
        ddq1: &[f64],
        duration: f64,
    ) -> Option<Self> {
        let polys = izip!(delta, dq0, dq1, ddq0, ddq1)
            .map(|(&d, &v0, &v1, &a0, &a1)| QuinticPolynomial::new(0.0, v0, a0, d, v1, a1, duration))
            .collect::<Option<Vec<_>>>()?;
        Some(Self { polys, duration })
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn dof(&self) -> usize {
        self.polys.len()
    }

    /// Largest |velocity| of each DOF, from `samples + 1` evenly spaced evaluations
    pub fn peak_speeds(&self, samples: usize) -> Vec<f64> {
        let samples = samples.max(1);
        self.polys
            .iter()
            .map(|p| {
                (0..=samples)
                    .map(|k| p.calc_first_derivative(self.duration * k as f64 / samples as f64).abs())
                    .fold(0.0, f64::max)
            })
            .collect()
    }

    /// Evaluates displacement from q0, velocity, acceleration and jerk at `t`
    pub fn eval(
        &self,
        t: f64,
        offset: &mut [f64],
        vel: &mut [f64],
        acc: &mut [f64],
        jerk: &mut [f64],
    ) {
        for (i, p) in self.polys.iter().enumerate() {
            offset[i] = p.calc_point(t);
            vel[i] = p.calc_first_derivative(t);
            acc[i] = p.calc_second_derivative(t);
            jerk[i] = p.calc_third_derivative(t);
        }
    }
}
