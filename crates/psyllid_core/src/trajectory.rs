use crate::error::{Result, SimulationError};
use crate::model::{Compartment, State};
use crate::solvers::{SolverStats, StopReason};
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum TrajectoryStatus {
    Complete,
    /// The integrator halted before the end of the span; only a prefix of the grid was
    /// sampled.
    Truncated { stopped_at: f64, reason: StopReason },
}

/// Sampled solution of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    times: Vec<f64>,
    states: Vec<State>,
    status: TrajectoryStatus,
    stats: SolverStats,
}

impl Trajectory {
    pub(crate) fn new(
        times: Vec<f64>,
        states: Vec<State>,
        status: TrajectoryStatus,
        stats: SolverStats,
    ) -> Self {
        debug_assert_eq!(times.len(), states.len());
        Self {
            times,
            states,
            status,
            stats,
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn status(&self) -> TrajectoryStatus {
        self.status
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status, TrajectoryStatus::Complete)
    }

    pub fn stats(&self) -> &SolverStats {
        &self.stats
    }

    pub fn final_state(&self) -> Option<&State> {
        self.states.last()
    }

    /// One compartment across every sample.
    pub fn series(&self, compartment: Compartment) -> Vec<f64> {
        let idx = compartment.index();
        self.states.iter().map(|s| s[idx]).collect()
    }

    /// Rows of `[t, Pu, Pi, Iu, Ii, Tu, Ti]`.
    pub fn rows(&self) -> impl Iterator<Item = [f64; 7]> + '_ {
        self.times.iter().zip(&self.states).map(|(&t, s)| {
            let mut row = [0.0; 7];
            row[0] = t;
            row[1..].copy_from_slice(s);
            row
        })
    }

    /// Fails with [`SimulationError::PartialIntegration`] unless the run reached the end of
    /// its span.
    pub fn require_complete(&self) -> Result<&Self> {
        match self.status {
            TrajectoryStatus::Complete => Ok(self),
            TrajectoryStatus::Truncated { stopped_at, reason } => {
                Err(SimulationError::PartialIntegration {
                    stopped_at,
                    reason,
                    samples: self.len(),
                })
            }
        }
    }

    pub fn write_csv<W: Write>(&self, mut writer: W) -> Result<()> {
        let header: Vec<&str> = std::iter::once("t")
            .chain(Compartment::ALL.iter().map(|c| c.short_name()))
            .collect();
        writeln!(writer, "{}", header.join(","))?;
        for row in self.rows() {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(writer, "{}", cells.join(","))?;
        }
        writer.flush()?;
        Ok(())
    }
}
