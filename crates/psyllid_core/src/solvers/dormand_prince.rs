//! Dormand–Prince 5(4) explicit pair with FSAL and cubic Hermite sampling.

use super::{
    check_arguments, clamp_non_negative, error_norm, initial_step, step_factor, Integrator,
    IntegrationOutput, IntegratorOptions, SampleCursor, SolverError, SolverStats, StopReason,
    Termination,
};
use crate::traits::Differentiable;
use tracing::{debug, trace};

const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th-order weights (advancing solution)
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// 5th minus embedded 4th-order weights
const E1: f64 = B1 - 5179.0 / 57600.0;
const E3: f64 = B3 - 7571.0 / 16695.0;
const E4: f64 = B4 - 393.0 / 640.0;
const E5: f64 = B5 + 92097.0 / 339200.0;
const E6: f64 = B6 - 187.0 / 2100.0;
const E7: f64 = -1.0 / 40.0;

pub struct DormandPrince45 {
    options: IntegratorOptions,
    k: [Vec<f64>; 7],
    tmp: Vec<f64>,
    y_new: Vec<f64>,
    err: Vec<f64>,
}

impl DormandPrince45 {
    pub fn new(options: IntegratorOptions) -> Self {
        Self {
            options,
            k: Default::default(),
            tmp: Vec::new(),
            y_new: Vec::new(),
            err: Vec::new(),
        }
    }

    pub fn options(&self) -> &IntegratorOptions {
        &self.options
    }

    fn resize(&mut self, n: usize) {
        for buf in self.k.iter_mut() {
            buf.clear();
            buf.resize(n, 0.0);
        }
        for buf in [&mut self.tmp, &mut self.y_new, &mut self.err] {
            buf.clear();
            buf.resize(n, 0.0);
        }
    }

    /// Fills stages k2..k7 and the trial state. `k[0]` must hold f(t, y).
    fn attempt<S: Differentiable>(&mut self, system: &S, t: f64, h: f64, y: &[f64]) -> f64 {
        let n = y.len();
        let [k1, k2, k3, k4, k5, k6, k7] = &mut self.k;
        let tmp = &mut self.tmp;

        for i in 0..n {
            tmp[i] = y[i] + h * A21 * k1[i];
        }
        system.apply(t + C2 * h, tmp, k2);

        for i in 0..n {
            tmp[i] = y[i] + h * (A31 * k1[i] + A32 * k2[i]);
        }
        system.apply(t + C3 * h, tmp, k3);

        for i in 0..n {
            tmp[i] = y[i] + h * (A41 * k1[i] + A42 * k2[i] + A43 * k3[i]);
        }
        system.apply(t + C4 * h, tmp, k4);

        for i in 0..n {
            tmp[i] = y[i] + h * (A51 * k1[i] + A52 * k2[i] + A53 * k3[i] + A54 * k4[i]);
        }
        system.apply(t + C5 * h, tmp, k5);

        for i in 0..n {
            tmp[i] = y[i]
                + h * (A61 * k1[i] + A62 * k2[i] + A63 * k3[i] + A64 * k4[i] + A65 * k5[i]);
        }
        system.apply(t + h, tmp, k6);

        for i in 0..n {
            self.y_new[i] =
                y[i] + h * (B1 * k1[i] + B3 * k3[i] + B4 * k4[i] + B5 * k5[i] + B6 * k6[i]);
        }
        system.apply(t + h, &self.y_new, k7);

        for i in 0..n {
            self.err[i] = h
                * (E1 * k1[i] + E3 * k3[i] + E4 * k4[i] + E5 * k5[i] + E6 * k6[i] + E7 * k7[i]);
        }

        let finite = self.y_new.iter().chain(k7.iter()).all(|v| v.is_finite());
        if !finite {
            return f64::INFINITY;
        }
        error_norm(&self.err, y, &self.y_new, &self.options)
    }
}

/// Cubic Hermite interpolation between (t, y, f) and (t + h, y_new, f_new).
fn hermite(theta: f64, h: f64, y: &[f64], f: &[f64], y_new: &[f64], f_new: &[f64], out: &mut [f64]) {
    let t2 = theta * theta;
    let t3 = t2 * theta;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + theta;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    for i in 0..out.len() {
        out[i] = h00 * y[i] + h10 * h * f[i] + h01 * y_new[i] + h11 * h * f_new[i];
    }
}

impl Integrator for DormandPrince45 {
    fn name(&self) -> &'static str {
        "dopri45"
    }

    fn integrate<S: Differentiable>(
        &mut self,
        system: &S,
        t0: f64,
        t1: f64,
        y0: &[f64],
        sample_times: &[f64],
    ) -> Result<IntegrationOutput, SolverError> {
        check_arguments(system, &self.options, t0, t1, y0, sample_times)?;
        let options = self.options;
        let n = y0.len();
        self.resize(n);

        let mut stats = SolverStats::default();
        let mut cursor = SampleCursor::new(sample_times, options.non_negative);
        let mut t = t0;
        let mut y = y0.to_vec();
        if options.non_negative {
            clamp_non_negative(&mut y);
        }
        cursor.emit_at(t, &y);

        if t1 == t0 {
            return Ok(cursor.finish(Termination::Completed, stats));
        }

        system.apply(t, &y, &mut self.k[0]);
        stats.rhs_evaluations += 1;
        let mut h = initial_step(&options, t1 - t0, &y, &self.k[0]);
        let mut attempts = 0usize;
        let mut last_non_finite = false;

        let termination = loop {
            if t >= t1 {
                break Termination::Completed;
            }
            if attempts >= options.max_steps {
                break Termination::Stopped {
                    t,
                    reason: StopReason::MaxSteps,
                };
            }
            attempts += 1;

            h = h.min(options.max_step);
            let reaches_end = t + h >= t1;
            if reaches_end {
                h = t1 - t;
            }

            let err_norm = self.attempt(system, t, h, &y);
            stats.rhs_evaluations += 6;

            if err_norm <= 1.0 {
                let t_new = if reaches_end { t1 } else { t + h };
                if options.non_negative && clamp_non_negative(&mut self.y_new) {
                    system.apply(t_new, &self.y_new, &mut self.k[6]);
                    stats.rhs_evaluations += 1;
                }

                let (f, f_new) = (&self.k[0], &self.k[6]);
                let y_new = &self.y_new;
                cursor.emit_step(t_new, y_new, |ts, out| {
                    hermite((ts - t) / h, h, &y, f, y_new, f_new, out);
                });

                t = t_new;
                y.copy_from_slice(&self.y_new);
                let [k1, .., k7] = &mut self.k;
                k1.copy_from_slice(k7);
                last_non_finite = false;
                stats.accepted_steps += 1;
            } else {
                last_non_finite = !err_norm.is_finite();
                stats.rejected_steps += 1;
                trace!(t, h, err_norm, "dopri45 rejected step");
            }

            h *= step_factor(err_norm, 5.0);
            if err_norm <= 1.0 {
                h = h.max(options.min_step);
            } else if h < options.min_step {
                let reason = if last_non_finite {
                    StopReason::NonFiniteState
                } else {
                    StopReason::StepSizeUnderflow
                };
                break Termination::Stopped { t, reason };
            }
        };

        if let Termination::Stopped { t, reason } = termination {
            debug!(t, %reason, accepted = stats.accepted_steps, "dopri45 stopped early");
        }
        Ok(cursor.finish(termination, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::tests::Decay;
    use crate::solvers::Rosenbrock23;
    use crate::traits::DynamicalSystem;

    /// Harmonic oscillator x'' = -x.
    struct Oscillator;

    impl DynamicalSystem<f64> for Oscillator {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[1];
            out[1] = -x[0];
        }
    }

    impl Differentiable for Oscillator {}

    /// dy/dt = y², which blows up at t = 1 for y(0) = 1.
    struct BlowUp;

    impl DynamicalSystem<f64> for BlowUp {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] * x[0];
        }
    }

    impl Differentiable for BlowUp {}

    #[test]
    fn oscillator_samples_follow_cosine() {
        let grid: Vec<f64> = (0..=40).map(|i| i as f64 * 0.25).collect();
        let mut solver = DormandPrince45::new(IntegratorOptions {
            rtol: 1e-9,
            atol: 1e-12,
            ..IntegratorOptions::default()
        });
        let out = solver
            .integrate(&Oscillator, 0.0, 10.0, &[1.0, 0.0], &grid)
            .expect("integrate");

        assert_eq!(out.termination, Termination::Completed);
        assert_eq!(out.times.len(), grid.len());
        assert_eq!(*out.times.last().expect("samples"), 10.0);
        for (t, y) in out.times.iter().zip(&out.states) {
            assert!((y[0] - t.cos()).abs() < 1e-6, "t={t}: {}", y[0]);
            assert!((y[1] + t.sin()).abs() < 1e-6, "t={t}: {}", y[1]);
        }
    }

    #[test]
    fn agrees_with_rosenbrock_on_non_stiff_problem() {
        let opts = IntegratorOptions {
            rtol: 1e-8,
            atol: 1e-10,
            ..IntegratorOptions::default()
        };
        let grid = [0.0, 2.5, 5.0];
        let system = Decay { k: 0.5 };
        let explicit = DormandPrince45::new(opts)
            .integrate(&system, 0.0, 5.0, &[1.0], &grid)
            .expect("dopri");
        let implicit = Rosenbrock23::new(opts)
            .integrate(&system, 0.0, 5.0, &[1.0], &grid)
            .expect("rosenbrock");
        for (a, b) in explicit.states.iter().zip(&implicit.states) {
            assert!((a[0] - b[0]).abs() < 1e-6, "dopri={} rosenbrock={}", a[0], b[0]);
        }
    }

    #[test]
    fn finite_time_blow_up_is_reported_as_a_stop() {
        let grid: Vec<f64> = (0..=20).map(|i| i as f64 * 0.1).collect();
        let mut solver = DormandPrince45::new(IntegratorOptions::default());
        let out = solver.integrate(&BlowUp, 0.0, 2.0, &[1.0], &grid).expect("integrate");

        match out.termination {
            Termination::Stopped { t, .. } => assert!(t < 1.0 + 1e-3, "stopped at {t}"),
            Termination::Completed => panic!("blow-up should not complete"),
        }
        assert!(out.times.len() >= 10 && out.times.len() < grid.len());
        assert!(out.states.iter().flatten().all(|v| v.is_finite()));
    }
}
