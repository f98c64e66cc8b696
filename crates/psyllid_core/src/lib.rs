pub mod analysis;
pub mod chart;
pub mod error;
pub mod model;
pub mod simulation;
pub mod solvers;
/// The `psyllid_core` crate holds the psyllid/tree epidemic model and the machinery
/// that integrates it.
///
/// Key components:
/// - **Traits**: `Scalar`, `DynamicalSystem` (vector fields), `Differentiable` (Jacobians for
///   implicit methods).
/// - **Model**: the six-compartment seasonally forced system and its parameters.
/// - **Solvers**: the `Integrator` strategy and its adaptive implementations (Rosenbrock23 for
///   stiff runs, Dormand-Prince 5(4)).
/// - **Simulation**: configuration, the solve driver and the sampled `Trajectory`.
/// - **Chart**: plain chart data for an external renderer.
pub mod traits;
pub mod trajectory;

pub use error::SimulationError;
pub use model::{Compartment, ModelParameters, PsyllidSystem, State, DEFAULT_INITIAL_STATE};
pub use simulation::{Method, PositivityPolicy, Simulation, SimulationConfig};
pub use solvers::{IntegratorOptions, StopReason};
pub use trajectory::{Trajectory, TrajectoryStatus};
