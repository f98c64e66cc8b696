//! Linearly-implicit Rosenbrock 2(3) pair (Shampine & Reichelt's modified Rosenbrock
//! formula). L-stable, so step sizes follow accuracy rather than the fastest decay rate.

use super::{
    check_arguments, clamp_non_negative, error_norm, initial_step, step_factor, Integrator,
    IntegrationOutput, IntegratorOptions, SampleCursor, SolverError, SolverStats, StopReason,
    Termination,
};
use crate::traits::Differentiable;
use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};
use std::f64::consts::SQRT_2;
use tracing::{debug, trace};

const D: f64 = 1.0 / (2.0 + SQRT_2);
const E32: f64 = 6.0 + SQRT_2;

pub struct Rosenbrock23 {
    options: IntegratorOptions,
    f0: Vec<f64>,
    f1: Vec<f64>,
    f2: Vec<f64>,
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    dfdt: Vec<f64>,
    jac: Vec<f64>,
    tmp: Vec<f64>,
    y_new: Vec<f64>,
    err: Vec<f64>,
}

impl Rosenbrock23 {
    pub fn new(options: IntegratorOptions) -> Self {
        Self {
            options,
            f0: Vec::new(),
            f1: Vec::new(),
            f2: Vec::new(),
            k1: Vec::new(),
            k2: Vec::new(),
            k3: Vec::new(),
            dfdt: Vec::new(),
            jac: Vec::new(),
            tmp: Vec::new(),
            y_new: Vec::new(),
            err: Vec::new(),
        }
    }

    pub fn options(&self) -> &IntegratorOptions {
        &self.options
    }

    fn resize(&mut self, n: usize) {
        for buf in [
            &mut self.f0,
            &mut self.f1,
            &mut self.f2,
            &mut self.k1,
            &mut self.k2,
            &mut self.k3,
            &mut self.dfdt,
            &mut self.tmp,
            &mut self.y_new,
            &mut self.err,
        ] {
            buf.clear();
            buf.resize(n, 0.0);
        }
        self.jac.clear();
        self.jac.resize(n * n, 0.0);
    }

    /// Factors W = I - h·d·J.
    fn factor(&self, n: usize, h: f64) -> Option<LU<f64, Dyn, Dyn>> {
        let hd = h * D;
        let w = DMatrix::from_fn(n, n, |i, j| {
            let identity = if i == j { 1.0 } else { 0.0 };
            identity - hd * self.jac[i * n + j]
        });
        if w.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let lu = w.lu();
        lu.is_invertible().then_some(lu)
    }
}

fn solve_into(lu: &LU<f64, Dyn, Dyn>, rhs: &[f64], out: &mut [f64]) -> bool {
    match lu.solve(&DVector::from_column_slice(rhs)) {
        Some(x) => {
            out.copy_from_slice(x.as_slice());
            true
        }
        None => false,
    }
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

impl Integrator for Rosenbrock23 {
    fn name(&self) -> &'static str {
        "rosenbrock23"
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

        system.apply(t, &y, &mut self.f0);
        stats.rhs_evaluations += 1;
        let mut h = initial_step(&options, t1 - t0, &y, &self.f0);
        let mut jacobian_current = false;
        let mut last_failure: Option<StopReason> = None;
        let mut attempts = 0usize;

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

            if !jacobian_current {
                system.jacobian(t, &y, &mut self.jac);
                system.time_derivative(t, &y, &mut self.dfdt);
                stats.jacobian_evaluations += 1;
                jacobian_current = true;
            }

            let err_norm = match self.factor(n, h) {
                None => {
                    last_failure = Some(StopReason::SingularMatrix);
                    f64::INFINITY
                }
                Some(lu) => {
                    stats.lu_decompositions += 1;
                    match self.attempt(system, &lu, t, h, &y, &mut stats) {
                        Some(norm) => norm,
                        None => {
                            last_failure = Some(StopReason::NonFiniteState);
                            f64::INFINITY
                        }
                    }
                }
            };

            if err_norm <= 1.0 {
                let t_new = if reaches_end { t1 } else { t + h };
                if options.non_negative && clamp_non_negative(&mut self.y_new) {
                    system.apply(t_new, &self.y_new, &mut self.f2);
                    stats.rhs_evaluations += 1;
                }

                let (k1, k2) = (&self.k1, &self.k2);
                cursor.emit_step(t_new, &self.y_new, |ts, out| {
                    let theta = (ts - t) / h;
                    let w1 = theta * (1.0 - theta) / (1.0 - 2.0 * D);
                    let w2 = theta * (theta - 2.0 * D) / (1.0 - 2.0 * D);
                    for i in 0..n {
                        out[i] = y[i] + h * (w1 * k1[i] + w2 * k2[i]);
                    }
                });

                t = t_new;
                y.copy_from_slice(&self.y_new);
                self.f0.copy_from_slice(&self.f2);
                jacobian_current = false;
                last_failure = None;
                stats.accepted_steps += 1;
            } else {
                stats.rejected_steps += 1;
                trace!(t, h, err_norm, "rosenbrock23 rejected step");
            }

            h *= step_factor(err_norm, 3.0);
            if err_norm <= 1.0 {
                h = h.max(options.min_step);
            } else if h < options.min_step {
                let reason = last_failure.unwrap_or(StopReason::StepSizeUnderflow);
                break Termination::Stopped { t, reason };
            }
        };

        if let Termination::Stopped { t, reason } = termination {
            debug!(t, %reason, accepted = stats.accepted_steps, "rosenbrock23 stopped early");
        }
        Ok(cursor.finish(termination, stats))
    }
}

impl Rosenbrock23 {
    /// Computes the three stages and the trial state for one step of size `h`. Returns the
    /// scaled error norm, or `None` when a stage or the trial state is not finite.
    fn attempt<S: Differentiable>(
        &mut self,
        system: &S,
        lu: &LU<f64, Dyn, Dyn>,
        t: f64,
        h: f64,
        y: &[f64],
        stats: &mut SolverStats,
    ) -> Option<f64> {
        let n = y.len();
        let hd = h * D;

        // k1 = W⁻¹ (F0 + h·d·T)
        for i in 0..n {
            self.tmp[i] = self.f0[i] + hd * self.dfdt[i];
        }
        if !solve_into(lu, &self.tmp, &mut self.k1) || !all_finite(&self.k1) {
            return None;
        }

        // F1 = f(t + h/2, y + h/2·k1)
        for i in 0..n {
            self.tmp[i] = y[i] + 0.5 * h * self.k1[i];
        }
        system.apply(t + 0.5 * h, &self.tmp, &mut self.f1);
        stats.rhs_evaluations += 1;

        // k2 = W⁻¹ (F1 - k1) + k1
        for i in 0..n {
            self.tmp[i] = self.f1[i] - self.k1[i];
        }
        if !solve_into(lu, &self.tmp, &mut self.k2) {
            return None;
        }
        for i in 0..n {
            self.k2[i] += self.k1[i];
            self.y_new[i] = y[i] + h * self.k2[i];
        }
        if !all_finite(&self.y_new) {
            return None;
        }

        system.apply(t + h, &self.y_new, &mut self.f2);
        stats.rhs_evaluations += 1;

        // k3 = W⁻¹ (F2 - e32 (k2 - F1) - 2 (k1 - F0) + h·d·T)
        for i in 0..n {
            self.tmp[i] = self.f2[i]
                - E32 * (self.k2[i] - self.f1[i])
                - 2.0 * (self.k1[i] - self.f0[i])
                + hd * self.dfdt[i];
        }
        if !solve_into(lu, &self.tmp, &mut self.k3) {
            return None;
        }

        for i in 0..n {
            self.err[i] = h / 6.0 * (self.k1[i] - 2.0 * self.k2[i] + self.k3[i]);
        }
        if !all_finite(&self.err) || !all_finite(&self.f2) {
            return None;
        }
        Some(error_norm(&self.err, y, &self.y_new, &self.options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::tests::Decay;
    use crate::traits::DynamicalSystem;

    /// Robertson's chemical kinetics problem, the usual stiff benchmark.
    struct Robertson;

    impl DynamicalSystem<f64> for Robertson {
        fn dimension(&self) -> usize {
            3
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -0.04 * x[0] + 1e4 * x[1] * x[2];
            out[1] = 0.04 * x[0] - 1e4 * x[1] * x[2] - 3e7 * x[1] * x[1];
            out[2] = 3e7 * x[1] * x[1];
        }
    }

    impl Differentiable for Robertson {}

    /// dy/dt = cos(t): exercises the explicit time dependence.
    struct Forced;

    impl DynamicalSystem<f64> for Forced {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = t.cos();
        }
    }

    impl Differentiable for Forced {
        fn jacobian(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = 0.0;
        }

        fn time_derivative(&self, t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = -t.sin();
        }
    }

    fn tight() -> IntegratorOptions {
        IntegratorOptions {
            rtol: 1e-7,
            atol: 1e-10,
            ..IntegratorOptions::default()
        }
    }

    #[test]
    fn exponential_decay_matches_closed_form() {
        let grid: Vec<f64> = (0..=10).map(|i| i as f64 * 0.2).collect();
        let mut solver = Rosenbrock23::new(tight());
        let out = solver
            .integrate(&Decay { k: 1.3 }, 0.0, 2.0, &[2.0], &grid)
            .expect("integrate");

        assert_eq!(out.termination, Termination::Completed);
        assert_eq!(out.times, grid);
        for (t, y) in out.times.iter().zip(&out.states) {
            let expected = 2.0 * (-1.3 * t).exp();
            assert!((y[0] - expected).abs() < 1e-5, "t={t}: {} vs {expected}", y[0]);
        }
    }

    #[test]
    fn explicit_time_dependence_is_tracked() {
        let grid = [0.0, 1.0, 2.5, 4.0];
        let mut solver = Rosenbrock23::new(tight());
        let out = solver.integrate(&Forced, 0.0, 4.0, &[0.0], &grid).expect("integrate");
        for (t, y) in out.times.iter().zip(&out.states) {
            assert!((y[0] - t.sin()).abs() < 1e-5, "t={t}");
        }
    }

    #[test]
    fn robertson_stays_cheap_and_conserves_mass() {
        let grid = [0.0, 1.0, 10.0, 40.0];
        let mut solver = Rosenbrock23::new(IntegratorOptions {
            rtol: 1e-4,
            atol: 1e-8,
            ..IntegratorOptions::default()
        });
        let out = solver
            .integrate(&Robertson, 0.0, 40.0, &[1.0, 0.0, 0.0], &grid)
            .expect("integrate");

        assert_eq!(out.termination, Termination::Completed);
        assert!(
            out.stats.accepted_steps < 2_000,
            "stiff solver took {} steps",
            out.stats.accepted_steps
        );
        for state in &out.states {
            let total: f64 = state.iter().sum();
            assert!((total - 1.0).abs() < 1e-6, "mass drifted to {total}");
        }
        // Reference value y1(40) ≈ 0.7158.
        assert!((out.states[3][0] - 0.7158).abs() < 2e-3);
    }

    #[test]
    fn zero_width_span_returns_initial_state() {
        let mut solver = Rosenbrock23::new(IntegratorOptions::default());
        let out = solver
            .integrate(&Decay { k: 1.0 }, 3.0, 3.0, &[5.0], &[3.0])
            .expect("integrate");
        assert_eq!(out.times, vec![3.0]);
        assert_eq!(out.states, vec![vec![5.0]]);
        assert_eq!(out.stats.accepted_steps, 0);
    }

    #[test]
    fn step_limit_stops_early_with_prefix() {
        let grid: Vec<f64> = (0..=100).map(|i| i as f64 * 0.1).collect();
        let mut solver = Rosenbrock23::new(IntegratorOptions {
            max_steps: 5,
            initial_step: 1e-3,
            ..tight()
        });
        let out = solver
            .integrate(&Decay { k: 1.0 }, 0.0, 10.0, &[1.0], &grid)
            .expect("integrate");

        match out.termination {
            Termination::Stopped { t, reason } => {
                assert_eq!(reason, StopReason::MaxSteps);
                assert!(t < 10.0);
            }
            Termination::Completed => panic!("expected early stop"),
        }
        assert!(out.times.len() < grid.len());
        assert_eq!(out.times[0], 0.0);
    }

    #[test]
    fn non_negative_option_clamps_samples() {
        // dy/dt = -1 crosses zero at t = 1.
        struct Drain;
        impl DynamicalSystem<f64> for Drain {
            fn dimension(&self) -> usize {
                1
            }
            fn apply(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
                out[0] = -1.0;
            }
        }
        impl Differentiable for Drain {}

        let grid = [0.0, 0.5, 1.5, 2.0];
        let mut unclamped = Rosenbrock23::new(IntegratorOptions::default());
        let raw = unclamped.integrate(&Drain, 0.0, 2.0, &[1.0], &grid).expect("raw");
        assert!(raw.states[3][0] < -0.9);

        let mut clamped = Rosenbrock23::new(IntegratorOptions {
            non_negative: true,
            ..IntegratorOptions::default()
        });
        let out = clamped.integrate(&Drain, 0.0, 2.0, &[1.0], &grid).expect("clamped");
        assert!(out.states.iter().all(|s| s[0] >= 0.0));
        assert!((out.states[1][0] - 0.5).abs() < 1e-9);
    }
}
