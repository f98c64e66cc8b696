use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// Floating-point types a vector field can be evaluated in.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Represents a continuous-time dynamical system dx/dt = f(t, x).
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Writes dx/dt at `(t, x)` into `out`, which has `dimension()` entries.
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// Derivative information needed by linearly-implicit integrators.
///
/// The defaults use central finite differences; systems with a closed-form
/// Jacobian should override both methods.
pub trait Differentiable: DynamicalSystem<f64> {
    /// Writes ∂f/∂x at (t, x) into `out` in row-major order (`dim * dim` entries).
    fn jacobian(&self, t: f64, x: &[f64], out: &mut [f64]) {
        finite_difference_jacobian(self, t, x, out);
    }

    /// Writes the explicit time derivative ∂f/∂t at (t, x) into `out`.
    fn time_derivative(&self, t: f64, x: &[f64], out: &mut [f64]) {
        finite_difference_time_derivative(self, t, x, out);
    }
}

pub fn finite_difference_jacobian<S>(system: &S, t: f64, x: &[f64], out: &mut [f64])
where
    S: DynamicalSystem<f64> + ?Sized,
{
    let dim = system.dimension();
    let mut probe = x.to_vec();
    let mut f_plus = vec![0.0; dim];
    let mut f_minus = vec![0.0; dim];

    for j in 0..dim {
        let orig = probe[j];
        let h = f64::EPSILON.cbrt() * orig.abs().max(1.0);
        probe[j] = orig + h;
        system.apply(t, &probe, &mut f_plus);
        probe[j] = orig - h;
        system.apply(t, &probe, &mut f_minus);
        probe[j] = orig;
        for i in 0..dim {
            out[i * dim + j] = (f_plus[i] - f_minus[i]) / (2.0 * h);
        }
    }
}

pub fn finite_difference_time_derivative<S>(system: &S, t: f64, x: &[f64], out: &mut [f64])
where
    S: DynamicalSystem<f64> + ?Sized,
{
    let dim = system.dimension();
    let h = f64::EPSILON.cbrt() * t.abs().max(1.0);
    let mut f_plus = vec![0.0; dim];
    let mut f_minus = vec![0.0; dim];
    system.apply(t + h, x, &mut f_plus);
    system.apply(t - h, x, &mut f_minus);
    for i in 0..dim {
        out[i] = (f_plus[i] - f_minus[i]) / (2.0 * h);
    }
}
