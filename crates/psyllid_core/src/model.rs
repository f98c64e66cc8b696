//! The six-compartment psyllid/tree system.
//!
//! State order is `Pu, Pi, Iu, Ii, Tu, Ti`: free uninfected and infected psyllids,
//! the tree-resident psyllid subpopulations on uninfected and infected trees, and the
//! uninfected and infected tree counts. Time is measured in months.

use crate::traits::{Differentiable, DynamicalSystem};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub const DIM: usize = 6;

pub type State = [f64; DIM];

pub const DEFAULT_INITIAL_STATE: State = [1e7, 1e2, 0.0, 0.0, 13000.0, 0.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compartment {
    UninfectedPsyllids,
    InfectedPsyllids,
    ResidentOnUninfected,
    ResidentOnInfected,
    UninfectedTrees,
    InfectedTrees,
}

impl Compartment {
    pub const ALL: [Compartment; DIM] = [
        Compartment::UninfectedPsyllids,
        Compartment::InfectedPsyllids,
        Compartment::ResidentOnUninfected,
        Compartment::ResidentOnInfected,
        Compartment::UninfectedTrees,
        Compartment::InfectedTrees,
    ];

    pub fn index(self) -> usize {
        match self {
            Compartment::UninfectedPsyllids => 0,
            Compartment::InfectedPsyllids => 1,
            Compartment::ResidentOnUninfected => 2,
            Compartment::ResidentOnInfected => 3,
            Compartment::UninfectedTrees => 4,
            Compartment::InfectedTrees => 5,
        }
    }

    /// Column name used in exported tables.
    pub fn short_name(self) -> &'static str {
        match self {
            Compartment::UninfectedPsyllids => "Pu",
            Compartment::InfectedPsyllids => "Pi",
            Compartment::ResidentOnUninfected => "Iu",
            Compartment::ResidentOnInfected => "Ii",
            Compartment::UninfectedTrees => "Tu",
            Compartment::InfectedTrees => "Ti",
        }
    }

    /// Legend label used in charts.
    pub fn label(self) -> &'static str {
        match self {
            Compartment::UninfectedPsyllids => "P_uninfected(t)",
            Compartment::InfectedPsyllids => "P_infected(t)",
            Compartment::ResidentOnUninfected => "I_uninfected(t)",
            Compartment::ResidentOnInfected => "I_infected(t)",
            Compartment::UninfectedTrees => "T_uninfected(t)",
            Compartment::InfectedTrees => "T_infected(t)",
        }
    }
}

/// The fourteen rate constants of the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    /// Rate at which resident psyllids return to the free population.
    pub a: f64,
    /// Fraction of contacts landing on infected trees.
    pub c: f64,
    /// Infection rate of free psyllids from infected trees.
    pub lambda: f64,
    /// Recovery rate of infected psyllids on uninfected trees.
    pub p: f64,
    /// Free psyllid mortality.
    pub mu_a: f64,
    /// Resident psyllids supported per tree.
    pub f: f64,
    /// Seasonal amplitude.
    pub v: f64,
    /// Seasonal angular frequency (radians per month).
    pub omega: f64,
    /// Colonization rate.
    pub w: f64,
    /// Probability that a resident on an infected tree becomes infected.
    pub q: f64,
    /// Resident psyllid mortality.
    pub mu_i: f64,
    /// Tree planting rate.
    pub g: f64,
    /// Tree infection rate.
    pub gamma: f64,
    /// Infected tree removal rate.
    pub beta: f64,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            a: 0.57,
            c: 0.5,
            lambda: 0.3,
            p: 1.22,
            mu_a: 0.76,
            f: 7000.0,
            v: 0.75,
            omega: PI / 6.0,
            w: 479.72,
            q: 0.82,
            mu_i: 0.44,
            g: 56.0,
            gamma: 1e-7,
            beta: 0.21,
        }
    }
}

impl ModelParameters {
    pub fn named(&self) -> [(&'static str, f64); 14] {
        [
            ("a", self.a),
            ("c", self.c),
            ("lambda", self.lambda),
            ("p", self.p),
            ("mu_a", self.mu_a),
            ("f", self.f),
            ("v", self.v),
            ("omega", self.omega),
            ("w", self.w),
            ("q", self.q),
            ("mu_i", self.mu_i),
            ("g", self.g),
            ("gamma", self.gamma),
            ("beta", self.beta),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.named() {
            if !value.is_finite() {
                bail!("Parameter '{}' must be finite (got {}).", name, value);
            }
        }
        Ok(())
    }

    /// Sinusoidal multiplier S(t) = 1 + v·sin(ωt).
    pub fn seasonal_factor(&self, t: f64) -> f64 {
        1.0 + self.v * (self.omega * t).sin()
    }

    /// Seasonal carrying capacity K(t) = f·S(t)·(Tu + Ti) for resident psyllids.
    pub fn carrying_capacity(&self, t: f64, tu: f64, ti: f64) -> f64 {
        self.f * self.seasonal_factor(t) * (ti + tu)
    }
}

/// Vector field of the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsyllidSystem {
    pub params: ModelParameters,
}

impl PsyllidSystem {
    pub fn new(params: ModelParameters) -> Self {
        Self { params }
    }

    pub fn derivative(&self, t: f64, y: &State) -> State {
        let mut out = [0.0; DIM];
        self.apply(t, y, &mut out);
        out
    }

    /// Occupancy (Iu + Ii) / K(t). An empty resident population has zero occupancy even
    /// when the capacity vanishes; any other zero capacity follows IEEE division.
    fn crowding(&self, t: f64, x: &[f64]) -> f64 {
        quotient(x[2] + x[3], self.params.carrying_capacity(t, x[4], x[5]))
    }

    /// Colonization pressure toward uninfected-resident and infected-resident pools,
    /// before density regulation.
    fn colonization(&self, x: &[f64]) -> (f64, f64) {
        let k = &self.params;
        let psyllids = x[0] + x[1];
        let to_uninfected = k.w * psyllids * ((1.0 - k.c) * x[4] + k.c * (1.0 - k.q) * x[5]);
        let to_infected = k.w * psyllids * k.c * k.q * x[5];
        (to_uninfected, to_infected)
    }
}

/// `num / den`, except that a zero numerator gives zero whatever the denominator.
fn quotient(num: f64, den: f64) -> f64 {
    if num == 0.0 {
        0.0
    } else {
        num / den
    }
}

impl DynamicalSystem<f64> for PsyllidSystem {
    fn dimension(&self) -> usize {
        DIM
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let k = &self.params;
        let [pu, pi, iu, ii, tu, ti] = [x[0], x[1], x[2], x[3], x[4], x[5]];

        let ratio = 1.0 - self.crowding(t, x);
        let (to_uninfected, to_infected) = self.colonization(x);
        let infection = k.c * k.lambda * pu * ti;
        let recovery = (1.0 - k.c) * k.p * pi * tu;
        let tree_infection = k.gamma * tu * pi;

        out[0] = k.a * iu - infection + recovery - k.mu_a * pu;
        out[1] = k.a * ii + infection - recovery - k.mu_a * pi;
        out[2] = to_uninfected * ratio - k.a * iu - k.mu_i * iu;
        out[3] = to_infected * ratio - k.a * ii - k.mu_i * ii;
        out[4] = k.g - tree_infection;
        out[5] = tree_infection - k.beta * ti;
    }
}

impl Differentiable for PsyllidSystem {
    fn jacobian(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let k = &self.params;
        let [pu, pi, _iu, _ii, tu, ti] = [x[0], x[1], x[2], x[3], x[4], x[5]];
        let psyllids = pu + pi;
        let trees = tu + ti;
        let capacity = k.carrying_capacity(t, tu, ti);
        let ratio = 1.0 - self.crowding(t, x);
        // ∂ratio/∂Tu = ∂ratio/∂Ti
        let ratio_d_trees = quotient(self.crowding(t, x), trees);
        let (to_uninfected, to_infected) = self.colonization(x);
        let turnover = k.a + k.mu_i;

        out.iter_mut().for_each(|v| *v = 0.0);
        let mut set = |row: usize, col: usize, value: f64| out[row * DIM + col] = value;

        set(0, 0, -k.c * k.lambda * ti - k.mu_a);
        set(0, 1, (1.0 - k.c) * k.p * tu);
        set(0, 2, k.a);
        set(0, 4, (1.0 - k.c) * k.p * pi);
        set(0, 5, -k.c * k.lambda * pu);

        set(1, 0, k.c * k.lambda * ti);
        set(1, 1, -(1.0 - k.c) * k.p * tu - k.mu_a);
        set(1, 3, k.a);
        set(1, 4, -(1.0 - k.c) * k.p * pi);
        set(1, 5, k.c * k.lambda * pu);

        let du_dp = k.w * ((1.0 - k.c) * tu + k.c * (1.0 - k.q) * ti) * ratio;
        set(2, 0, du_dp);
        set(2, 1, du_dp);
        set(2, 2, -quotient(to_uninfected, capacity) - turnover);
        set(2, 3, -quotient(to_uninfected, capacity));
        set(2, 4, k.w * psyllids * (1.0 - k.c) * ratio + to_uninfected * ratio_d_trees);
        set(
            2,
            5,
            k.w * psyllids * k.c * (1.0 - k.q) * ratio + to_uninfected * ratio_d_trees,
        );

        let di_dp = k.w * k.c * k.q * ti * ratio;
        set(3, 0, di_dp);
        set(3, 1, di_dp);
        set(3, 2, -quotient(to_infected, capacity));
        set(3, 3, -quotient(to_infected, capacity) - turnover);
        set(3, 4, to_infected * ratio_d_trees);
        set(3, 5, k.w * psyllids * k.c * k.q * ratio + to_infected * ratio_d_trees);

        set(4, 1, -k.gamma * tu);
        set(4, 4, -k.gamma * pi);

        set(5, 1, k.gamma * tu);
        set(5, 4, k.gamma * pi);
        set(5, 5, -k.beta);
    }

    fn time_derivative(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let k = &self.params;
        let seasonal = k.seasonal_factor(t);
        let seasonal_rate = k.v * k.omega * (k.omega * t).cos();
        let ratio_dt = self.crowding(t, x) * seasonal_rate / seasonal;
        let (to_uninfected, to_infected) = self.colonization(x);

        out.iter_mut().for_each(|v| *v = 0.0);
        out[2] = to_uninfected * ratio_dt;
        out[3] = to_infected * ratio_dt;
    }
}
