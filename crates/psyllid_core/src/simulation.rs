//! Simulation configuration and the integration driver.

use crate::chart::Chart;
use crate::error::{Result, SimulationError};
use crate::model::{ModelParameters, PsyllidSystem, State, DEFAULT_INITIAL_STATE, DIM};
use crate::solvers::{
    DormandPrince45, IntegrationOutput, Integrator, IntegratorOptions, Rosenbrock23, StopReason,
    Termination,
};
use crate::trajectory::{Trajectory, TrajectoryStatus};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[default]
    Rosenbrock23,
    DormandPrince45,
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rosenbrock" | "rosenbrock23" => Ok(Method::Rosenbrock23),
            "dopri" | "dopri45" | "dormand_prince45" => Ok(Method::DormandPrince45),
            other => Err(format!("Unknown method '{other}'")),
        }
    }
}

/// What to do with populations that the integrator drives below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositivityPolicy {
    /// Keep the raw arithmetic, negative excursions included.
    #[default]
    Unclamped,
    /// Clamp negative components to zero after each accepted step and on every sample.
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub parameters: ModelParameters,
    pub initial_state: State,
    /// Start and end of the run, in months.
    pub t_span: [f64; 2],
    /// Number of evenly spaced output samples across `t_span`.
    pub samples: usize,
    pub method: Method,
    pub options: IntegratorOptions,
    pub positivity: PositivityPolicy,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            parameters: ModelParameters::default(),
            initial_state: DEFAULT_INITIAL_STATE,
            t_span: [0.0, 350.0],
            samples: 1000,
            method: Method::default(),
            options: IntegratorOptions::default(),
            positivity: PositivityPolicy::default(),
        }
    }
}

impl SimulationConfig {
    pub fn with_parameters(mut self, parameters: ModelParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_initial_state(mut self, initial_state: State) -> Self {
        self.initial_state = initial_state;
        self
    }

    pub fn with_t_span(mut self, t_span: [f64; 2]) -> Self {
        self.t_span = t_span;
        self
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_options(mut self, options: IntegratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_positivity(mut self, positivity: PositivityPolicy) -> Self {
        self.positivity = positivity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.parameters
            .validate()
            .map_err(|err| SimulationError::InvalidConfig(err.to_string()))?;
        if self.initial_state.iter().any(|v| !v.is_finite()) {
            return Err(SimulationError::InvalidConfig(
                "initial state must be finite".into(),
            ));
        }
        let [t0, t1] = self.t_span;
        if !t0.is_finite() || !t1.is_finite() || t1 < t0 {
            return Err(SimulationError::InvalidConfig(format!(
                "time span [{t0}, {t1}] must be finite with t1 >= t0"
            )));
        }
        if self.samples == 0 {
            return Err(SimulationError::InvalidConfig(
                "samples must be at least 1".into(),
            ));
        }
        self.options
            .validate()
            .map_err(|err| SimulationError::InvalidConfig(err.to_string()))?;
        Ok(())
    }

    /// Evenly spaced output grid. The last point is exactly `t1`; a zero-width span or a
    /// single sample yields `[t0]`.
    pub fn sample_times(&self) -> Vec<f64> {
        let [t0, t1] = self.t_span;
        if self.samples <= 1 || t1 == t0 {
            return vec![t0];
        }
        let last = self.samples - 1;
        let step = (t1 - t0) / last as f64;
        (0..self.samples)
            .map(|i| if i == last { t1 } else { t0 + i as f64 * step })
            .collect()
    }

    pub fn system(&self) -> PsyllidSystem {
        PsyllidSystem::new(self.parameters)
    }

    /// Runs the configured integrator and returns the sampled trajectory.
    ///
    /// A run that halts before `t1` comes back as a [`TrajectoryStatus::Truncated`]
    /// trajectory holding the samples it did produce. It is an
    /// [`SimulationError::IntegrationFailure`] when the derivative is non-finite at the
    /// initial state or nothing past `t0` could be sampled.
    pub fn solve(&self) -> Result<Trajectory> {
        self.validate()?;
        let system = self.system();
        let grid = self.sample_times();
        let t0 = self.t_span[0];
        let t_end = if grid.len() == 1 { t0 } else { self.t_span[1] };

        let f0 = system.derivative(t0, &self.initial_state);
        if f0.iter().any(|v| !v.is_finite()) {
            return Err(SimulationError::IntegrationFailure {
                t: t0,
                reason: StopReason::NonFiniteState,
            });
        }

        let options = IntegratorOptions {
            non_negative: self.positivity == PositivityPolicy::Clamp,
            ..self.options
        };
        let output = match self.method {
            Method::Rosenbrock23 => {
                run(Rosenbrock23::new(options), &system, t0, t_end, &self.initial_state, &grid)?
            }
            Method::DormandPrince45 => {
                run(DormandPrince45::new(options), &system, t0, t_end, &self.initial_state, &grid)?
            }
        };

        let stats = output.stats;
        let states: Vec<State> = output
            .states
            .iter()
            .map(|s| {
                let mut state = [0.0; DIM];
                state.copy_from_slice(s);
                state
            })
            .collect();

        let status = match output.termination {
            Termination::Completed => TrajectoryStatus::Complete,
            Termination::Stopped { t, reason } if states.len() <= 1 => {
                warn!(t, %reason, "integration produced no samples past t0");
                return Err(SimulationError::IntegrationFailure { t, reason });
            }
            Termination::Stopped { t, reason } => {
                warn!(
                    t,
                    %reason,
                    samples = states.len(),
                    requested = grid.len(),
                    "integration stopped early"
                );
                TrajectoryStatus::Truncated {
                    stopped_at: t,
                    reason,
                }
            }
        };

        info!(
            method = ?self.method,
            samples = states.len(),
            accepted = stats.accepted_steps,
            rejected = stats.rejected_steps,
            rhs = stats.rhs_evaluations,
            "solve finished"
        );
        Ok(Trajectory::new(output.times, states, status, stats))
    }
}

fn run<I: Integrator>(
    mut integrator: I,
    system: &PsyllidSystem,
    t0: f64,
    t1: f64,
    y0: &State,
    grid: &[f64],
) -> Result<IntegrationOutput> {
    Ok(integrator.integrate(system, t0, t1, y0, grid)?)
}

/// Integration driver: a fixed configuration plus the trajectory of its last successful
/// solve. Starts unsolved; `solve` replaces any previous trajectory.
#[derive(Debug, Clone)]
pub struct Simulation {
    config: SimulationConfig,
    trajectory: Option<Trajectory>,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            trajectory: None,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn is_solved(&self) -> bool {
        self.trajectory.is_some()
    }

    pub fn solve(&mut self) -> Result<&Trajectory> {
        self.trajectory = None;
        let trajectory = self.config.solve()?;
        Ok(&*self.trajectory.insert(trajectory))
    }

    pub fn trajectory(&self) -> Result<&Trajectory> {
        self.trajectory.as_ref().ok_or(SimulationError::NotSolved)
    }

    pub fn into_trajectory(self) -> Result<Trajectory> {
        self.trajectory.ok_or(SimulationError::NotSolved)
    }

    pub fn charts(&self) -> Result<[Chart; 2]> {
        Ok(self.trajectory()?.charts())
    }

    pub fn export_csv<W: Write>(&self, writer: W) -> Result<()> {
        self.trajectory()?.write_csv(writer)
    }
}
