//! Adaptive integrators.
//!
//! Every method implements [`Integrator`]: integrate from `t0` to `t1` and report the
//! solution at caller-chosen sample times, interpolated from the method's own accepted
//! steps. A run that cannot reach `t1` is not an error here; it comes back as
//! [`Termination::Stopped`] with the samples produced so far.

mod dormand_prince;
mod rosenbrock;

pub use dormand_prince::DormandPrince45;
pub use rosenbrock::Rosenbrock23;

use crate::traits::Differentiable;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorOptions {
    pub rtol: f64,
    pub atol: f64,
    /// Initial step size; zero selects one from the scaled state and derivative.
    pub initial_step: f64,
    pub min_step: f64,
    /// Unbounded by default; written as `null` in JSON.
    #[serde(with = "unbounded")]
    pub max_step: f64,
    /// Upper bound on step attempts, accepted and rejected together.
    pub max_steps: usize,
    /// Clamp negative components to zero after every accepted step.
    pub non_negative: bool,
}

impl Default for IntegratorOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-3,
            atol: 1e-6,
            initial_step: 0.0,
            min_step: 1e-12,
            max_step: f64::INFINITY,
            max_steps: 100_000,
            non_negative: false,
        }
    }
}

impl IntegratorOptions {
    pub fn validate(&self) -> Result<(), SolverError> {
        if !self.rtol.is_finite() || self.rtol <= 0.0 {
            return Err(SolverError::InvalidOption("rtol must be finite and positive".into()));
        }
        if !self.atol.is_finite() || self.atol <= 0.0 {
            return Err(SolverError::InvalidOption("atol must be finite and positive".into()));
        }
        if !self.initial_step.is_finite() || self.initial_step < 0.0 {
            return Err(SolverError::InvalidOption(
                "initial_step must be finite and non-negative".into(),
            ));
        }
        if !self.min_step.is_finite() || self.min_step <= 0.0 {
            return Err(SolverError::InvalidOption("min_step must be finite and positive".into()));
        }
        if self.max_step.is_nan() || self.max_step < self.min_step {
            return Err(SolverError::InvalidOption("max_step must be at least min_step".into()));
        }
        if self.max_steps == 0 {
            return Err(SolverError::InvalidOption("max_steps must be greater than zero".into()));
        }
        Ok(())
    }
}

/// JSON has no infinity, so an unbounded step travels as `null`.
mod unbounded {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_infinite() && *value > 0.0 {
            serializer.serialize_none()
        } else {
            serializer.serialize_some(value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    #[error("initial state has {got} components but the system has dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("time span [{t0}, {t1}] must be finite with t1 >= t0")]
    InvalidSpan { t0: f64, t1: f64 },

    #[error("sample times must be sorted and lie within the time span")]
    InvalidSampleTimes,

    #[error("initial state must be finite")]
    NonFiniteInitialState,

    #[error("invalid integrator option: {0}")]
    InvalidOption(String),
}

/// Why an integration halted before reaching the end of its span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    MaxSteps,
    StepSizeUnderflow,
    NonFiniteState,
    SingularMatrix,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::MaxSteps => "step limit exceeded",
            StopReason::StepSizeUnderflow => "step size fell below the minimum",
            StopReason::NonFiniteState => "state became non-finite",
            StopReason::SingularMatrix => "iteration matrix is singular",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Termination {
    Completed,
    Stopped { t: f64, reason: StopReason },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub rhs_evaluations: usize,
    pub jacobian_evaluations: usize,
    pub lu_decompositions: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationOutput {
    pub times: Vec<f64>,
    pub states: Vec<Vec<f64>>,
    pub termination: Termination,
    pub stats: SolverStats,
}

/// Pluggable integration strategy.
pub trait Integrator {
    fn name(&self) -> &'static str;

    /// Integrates `system` from `(t0, y0)` to `t1`, reporting the state at each of
    /// `sample_times` (sorted, inside `[t0, t1]`).
    fn integrate<S: Differentiable>(
        &mut self,
        system: &S,
        t0: f64,
        t1: f64,
        y0: &[f64],
        sample_times: &[f64],
    ) -> Result<IntegrationOutput, SolverError>;
}

pub(crate) fn check_arguments<S: Differentiable>(
    system: &S,
    options: &IntegratorOptions,
    t0: f64,
    t1: f64,
    y0: &[f64],
    sample_times: &[f64],
) -> Result<(), SolverError> {
    options.validate()?;
    let dim = system.dimension();
    if y0.len() != dim {
        return Err(SolverError::DimensionMismatch {
            expected: dim,
            got: y0.len(),
        });
    }
    if !t0.is_finite() || !t1.is_finite() || t1 < t0 {
        return Err(SolverError::InvalidSpan { t0, t1 });
    }
    if y0.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::NonFiniteInitialState);
    }
    let in_span = sample_times.iter().all(|&s| s >= t0 && s <= t1);
    let sorted = sample_times.windows(2).all(|pair| pair[0] <= pair[1]);
    if !in_span || !sorted {
        return Err(SolverError::InvalidSampleTimes);
    }
    Ok(())
}

/// Scaled RMS norm used for both error estimates and step-size selection.
pub(crate) fn error_norm(err: &[f64], y_old: &[f64], y_new: &[f64], options: &IntegratorOptions) -> f64 {
    let n = err.len();
    let mut sum = 0.0;
    for i in 0..n {
        let scale = options.atol + options.rtol * y_old[i].abs().max(y_new[i].abs());
        let ratio = err[i] / scale;
        sum += ratio * ratio;
    }
    let norm = (sum / n as f64).sqrt();
    if norm.is_finite() {
        norm
    } else {
        f64::INFINITY
    }
}

pub(crate) fn initial_step(options: &IntegratorOptions, span: f64, y0: &[f64], f0: &[f64]) -> f64 {
    if options.initial_step > 0.0 {
        return options.initial_step.min(span);
    }
    let d0 = error_norm(y0, y0, y0, options);
    let d1 = error_norm(f0, y0, y0, options);
    let guess = if d0 < 1e-5 || d1 < 1e-5 || !d1.is_finite() {
        1e-6
    } else {
        0.01 * d0 / d1
    };
    guess.min(span).min(options.max_step).max(options.min_step)
}

/// Step-size multiplier for an error estimate of the given order.
pub(crate) fn step_factor(err_norm: f64, order: f64) -> f64 {
    const SAFETY: f64 = 0.9;
    const MIN_FACTOR: f64 = 0.2;
    const MAX_FACTOR: f64 = 5.0;
    if !err_norm.is_finite() {
        return MIN_FACTOR;
    }
    if err_norm == 0.0 {
        return MAX_FACTOR;
    }
    (SAFETY * err_norm.powf(-1.0 / order)).clamp(MIN_FACTOR, MAX_FACTOR)
}

pub(crate) fn clamp_non_negative(state: &mut [f64]) -> bool {
    let mut changed = false;
    for value in state.iter_mut() {
        if *value < 0.0 {
            *value = 0.0;
            changed = true;
        }
    }
    changed
}

/// Collects samples on the requested grid as accepted steps sweep past it.
pub(crate) struct SampleCursor<'a> {
    times: &'a [f64],
    next: usize,
    non_negative: bool,
    out_times: Vec<f64>,
    out_states: Vec<Vec<f64>>,
}

impl<'a> SampleCursor<'a> {
    pub(crate) fn new(times: &'a [f64], non_negative: bool) -> Self {
        Self {
            times,
            next: 0,
            non_negative,
            out_times: Vec::with_capacity(times.len()),
            out_states: Vec::with_capacity(times.len()),
        }
    }

    /// Emits every pending sample at or before `t`, which must equal the current state.
    pub(crate) fn emit_at(&mut self, t: f64, y: &[f64]) {
        self.emit_step(t, y, |_, _| {});
    }

    /// Emits every pending sample up to `t_new`. Samples strictly before `t_new` come from
    /// `interpolate`; a sample exactly at `t_new` takes `y_new` verbatim.
    pub(crate) fn emit_step<F>(&mut self, t_new: f64, y_new: &[f64], mut interpolate: F)
    where
        F: FnMut(f64, &mut [f64]),
    {
        while self.next < self.times.len() && self.times[self.next] <= t_new {
            let ts = self.times[self.next];
            let mut state = y_new.to_vec();
            if ts < t_new {
                interpolate(ts, &mut state);
            }
            if self.non_negative {
                clamp_non_negative(&mut state);
            }
            self.out_times.push(ts);
            self.out_states.push(state);
            self.next += 1;
        }
    }

    pub(crate) fn finish(self, termination: Termination, stats: SolverStats) -> IntegrationOutput {
        IntegrationOutput {
            times: self.out_times,
            states: self.out_states,
            termination,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::DynamicalSystem;

    /// Exponential decay dy/dt = -k y.
    pub(crate) struct Decay {
        pub(crate) k: f64,
    }

    impl DynamicalSystem<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -self.k * x[0];
        }
    }

    impl Differentiable for Decay {}

    #[test]
    fn options_reject_bad_tolerances() {
        let bad = IntegratorOptions {
            rtol: 0.0,
            ..IntegratorOptions::default()
        };
        assert!(matches!(bad.validate(), Err(SolverError::InvalidOption(_))));
        let bad = IntegratorOptions {
            max_steps: 0,
            ..IntegratorOptions::default()
        };
        assert!(bad.validate().is_err());
        assert!(IntegratorOptions::default().validate().is_ok());
    }

    #[test]
    fn unbounded_max_step_survives_json() {
        let json = serde_json::to_string(&IntegratorOptions::default()).expect("serialize");
        assert!(json.contains("\"max_step\":null"));
        let back: IntegratorOptions = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, IntegratorOptions::default());

        let bounded: IntegratorOptions =
            serde_json::from_str(r#"{ "max_step": 0.5 }"#).expect("deserialize");
        assert_eq!(bounded.max_step, 0.5);
        assert_eq!(bounded.rtol, 1e-3);
    }

    #[test]
    fn argument_checks_cover_span_dimension_and_grid() {
        let system = Decay { k: 1.0 };
        let options = IntegratorOptions::default();
        assert!(matches!(
            check_arguments(&system, &options, 0.0, 1.0, &[1.0, 2.0], &[]),
            Err(SolverError::DimensionMismatch { expected: 1, got: 2 })
        ));
        assert!(matches!(
            check_arguments(&system, &options, 1.0, 0.0, &[1.0], &[]),
            Err(SolverError::InvalidSpan { .. })
        ));
        assert_eq!(
            check_arguments(&system, &options, 0.0, 1.0, &[1.0], &[0.5, 0.2]),
            Err(SolverError::InvalidSampleTimes)
        );
        assert_eq!(
            check_arguments(&system, &options, 0.0, 1.0, &[1.0], &[0.0, 1.5]),
            Err(SolverError::InvalidSampleTimes)
        );
        assert_eq!(
            check_arguments(&system, &options, 0.0, 1.0, &[f64::NAN], &[0.0]),
            Err(SolverError::NonFiniteInitialState)
        );
    }

    #[test]
    fn step_factor_is_bounded() {
        assert_eq!(step_factor(0.0, 3.0), 5.0);
        assert_eq!(step_factor(f64::INFINITY, 3.0), 0.2);
        assert_eq!(step_factor(1e12, 3.0), 0.2);
        let mid = step_factor(1.0, 3.0);
        assert!((mid - 0.9).abs() < 1e-12);
    }

    #[test]
    fn cursor_lands_on_grid_points() {
        let grid = [0.0, 0.25, 0.5, 1.0];
        let mut cursor = SampleCursor::new(&grid, true);
        cursor.emit_at(0.0, &[4.0]);
        cursor.emit_step(0.6, &[1.0], |t, out| out[0] = -t);
        cursor.emit_step(1.0, &[2.0], |_, out| out[0] = f64::NAN);
        let output = cursor.finish(Termination::Completed, SolverStats::default());

        assert_eq!(output.times, grid.to_vec());
        assert_eq!(output.states[0], vec![4.0]);
        // Interpolated negatives are clamped when the non-negative policy is active.
        assert_eq!(output.states[1], vec![0.0]);
        assert_eq!(output.states[2], vec![0.0]);
        assert_eq!(output.states[3], vec![2.0]);
    }
}
