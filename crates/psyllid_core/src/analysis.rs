use crate::traits::Differentiable;
use anyhow::{anyhow, bail, Result};
use nalgebra::{Complex, DMatrix};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexNumber {
    pub re: f64,
    pub im: f64,
}

impl From<Complex<f64>> for ComplexNumber {
    fn from(value: Complex<f64>) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

/// Local timescale separation of a system at one point of state space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StiffnessReport {
    pub t: f64,
    pub state: Vec<f64>,
    pub eigenvalues: Vec<ComplexNumber>,
    /// Largest |Re λ| over decaying modes (Re λ < 0).
    pub fastest_decay: f64,
    /// Smallest |Re λ| over decaying modes.
    pub slowest_decay: f64,
    /// `fastest_decay / slowest_decay`; 1 when fewer than two modes decay.
    pub stiffness_ratio: f64,
}

/// Eigen-analysis of the Jacobian at `(t, state)`.
pub fn stiffness_report<S: Differentiable>(system: &S, t: f64, state: &[f64]) -> Result<StiffnessReport> {
    let dim = system.dimension();
    if dim == 0 {
        bail!("System has zero dimension.");
    }
    if state.len() != dim {
        bail!(
            "State dimension mismatch. Expected {}, got {}.",
            dim,
            state.len()
        );
    }

    let mut jacobian = vec![0.0; dim * dim];
    system.jacobian(t, state, &mut jacobian);
    if jacobian.iter().any(|v| !v.is_finite()) {
        return Err(anyhow!("Jacobian is not finite at t = {}.", t));
    }

    let matrix = DMatrix::from_row_slice(dim, dim, &jacobian);
    let eigenvalues: Vec<Complex<f64>> = matrix.complex_eigenvalues().iter().copied().collect();

    let decay_rates: Vec<f64> = eigenvalues
        .iter()
        .filter(|lambda| lambda.re < 0.0)
        .map(|lambda| -lambda.re)
        .collect();
    let fastest_decay = decay_rates.iter().copied().fold(0.0, f64::max);
    let slowest_decay = decay_rates.iter().copied().fold(f64::INFINITY, f64::min);
    let stiffness_ratio = if decay_rates.len() < 2 {
        1.0
    } else {
        fastest_decay / slowest_decay
    };

    Ok(StiffnessReport {
        t,
        state: state.to_vec(),
        eigenvalues: eigenvalues.into_iter().map(ComplexNumber::from).collect(),
        fastest_decay,
        slowest_decay: if decay_rates.is_empty() { 0.0 } else { slowest_decay },
        stiffness_ratio,
    })
}
