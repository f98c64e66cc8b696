use crate::solvers::{SolverError, StopReason};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("the model has not been solved yet; call solve() first")]
    NotSolved,

    #[error("integration failed at t = {t}: {reason}")]
    IntegrationFailure { t: f64, reason: StopReason },

    #[error("integration stopped at t = {stopped_at} after {samples} samples: {reason}")]
    PartialIntegration {
        stopped_at: f64,
        reason: StopReason,
        samples: usize,
    },

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error("failed to write trajectory: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimulationError>;
