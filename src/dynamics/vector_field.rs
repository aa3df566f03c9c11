//! Vector Field: Hamilton's Equations with Friction and Input
//!
//! For coordinates `x = (q1, p1, ..., qn, pn)` and Hamiltonian `H`:
//!
//! ```text
//! dq_k/dt =  ∂H/∂p_k                    + u(t) G_{2k}(x)
//! dp_k/dt = −∂H/∂q_k − C_k ∂H/∂p_k      + u(t) G_{2k+1}(x)
//! ```
//!
//! The gradient of `Σ_batch H` is taken on the tape holding `x`, so the
//! returned derivative stays differentiable with respect to any parameters
//! the Hamiltonian lifted onto that tape.

use ndarray::{Array2, ArrayView2};

use crate::autodiff::{Tape, Var};
use crate::context::ExecutionContext;
use crate::control::{InputFunction, InputMatrix};
use crate::error::{Error, Result};
use crate::systems::Hamiltonian;

/// Time derivative of a state, for whatever state representation `S`
/// the integrator is stepping.
pub trait VectorField<S> {
    fn derivative(&self, t: f64, state: &S) -> Result<S>;
}

/// Hamilton's equations for a (physical or learned) Hamiltonian.
pub struct HamiltonianDynamics<'a> {
    pub hamiltonian: &'a dyn Hamiltonian,
    pub input: &'a InputFunction,
    pub input_matrix: &'a dyn InputMatrix,
    /// Friction per degree of freedom
    pub friction: &'a [f64],
    pub ctx: ExecutionContext,
}

impl<'a> HamiltonianDynamics<'a> {
    pub fn new(
        hamiltonian: &'a dyn Hamiltonian,
        input: &'a InputFunction,
        input_matrix: &'a dyn InputMatrix,
        friction: &'a [f64],
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            hamiltonian,
            input,
            input_matrix,
            friction,
            ctx,
        }
    }

    /// `u(t) G(x)` as `[batch, coord]`, or `None` when no input is applied.
    fn forcing(&self, t: f64, coords: &Var) -> Result<Option<Var>> {
        if self.input.is_zero() {
            return Ok(None);
        }
        let (batch, width) = coords.shape();
        let g = self.input_matrix.row(coords, &self.ctx)?;
        let (rows, cols) = g.shape();
        if cols != width {
            return Err(Error::ShapeMismatch {
                context: "input matrix",
                expected: vec![rows, width],
                found: vec![rows, cols],
            });
        }
        let g = match rows {
            1 => g.broadcast_rows(batch),
            r if r == batch => g,
            _ => {
                return Err(Error::ShapeMismatch {
                    context: "input matrix rows",
                    expected: vec![batch, width],
                    found: vec![rows, cols],
                })
            }
        };
        Ok(Some(&g * self.input.value(t)))
    }

    /// Derivatives of plain coordinates, evaluated on a throwaway tape.
    pub fn coordinate_derivatives(&self, t: f64, coords: ArrayView2<f64>) -> Result<Array2<f64>> {
        let tape = Tape::new();
        let x = tape.leaf(coords.to_owned());
        let dx = <Self as VectorField<Var>>::derivative(self, t, &x)?;
        tape.check()?;
        Ok(dx.to_array())
    }
}

impl VectorField<Var> for HamiltonianDynamics<'_> {
    fn derivative(&self, t: f64, coords: &Var) -> Result<Var> {
        let expected = self.hamiltonian.coord_dim();
        let width = coords.shape().1;
        if width != expected || expected % 2 != 0 {
            return Err(Error::CoordinateMismatch {
                expected,
                found: width,
            });
        }
        let dof = expected / 2;
        if self.friction.len() != dof {
            return Err(Error::InvalidConfig(format!(
                "{} friction coefficients for {} degrees of freedom",
                self.friction.len(),
                dof
            )));
        }

        let h = self.hamiltonian.hamiltonian(coords, &self.ctx)?;
        let grad = coords
            .tape()
            .grad(&h.sum_all(), std::slice::from_ref(coords))?
            .remove(0);
        let found = grad.shape().1;
        if found != expected {
            return Err(Error::CoordinateMismatch { expected, found });
        }

        let forcing = self.forcing(t, coords)?;
        let mut parts = Vec::with_capacity(expected);
        for (k, &c) in self.friction.iter().enumerate() {
            let dh_dq = grad.column(2 * k);
            let dh_dp = grad.column(2 * k + 1);
            let mut dq = dh_dp.clone();
            let mut dp = &(-&dh_dq) - &(&dh_dp * c);
            if let Some(f) = &forcing {
                dq = &dq + &f.column(2 * k);
                dp = &dp + &f.column(2 * k + 1);
            }
            parts.push(dq);
            parts.push(dp);
        }
        Var::concat_cols(&parts)
    }
}

impl VectorField<Array2<f64>> for HamiltonianDynamics<'_> {
    fn derivative(&self, t: f64, state: &Array2<f64>) -> Result<Array2<f64>> {
        self.coordinate_derivatives(t, state.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::StaticInputMatrix;
    use crate::systems::{FurutaPendulum, SimplePendulum};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_simple_pendulum_equations() {
        let system = SimplePendulum::default().with_friction(0.5);
        let input = InputFunction::Zero;
        let g = StaticInputMatrix::Zero;
        let friction = [0.5];
        let dynamics =
            HamiltonianDynamics::new(&system, &input, &g, &friction, ExecutionContext::inference());
        let dx = dynamics
            .coordinate_derivatives(0.0, array![[0.4, 2.0]].view())
            .unwrap();
        // q̇ = p, ṗ = −g sin q − C p
        assert_abs_diff_eq!(dx[[0, 0]], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dx[[0, 1]], -9.81 * 0.4f64.sin() - 0.5 * 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_row_input_matrix_is_broadcast() {
        let system = SimplePendulum::default();
        let input = InputFunction::Step {
            amplitude: 2.0,
            t0: 0.0,
        };
        let g = StaticInputMatrix::torque(2);
        let friction = [0.0];
        let dynamics =
            HamiltonianDynamics::new(&system, &input, &g, &friction, ExecutionContext::inference());
        let dx = dynamics
            .coordinate_derivatives(0.1, array![[0.0, 0.0], [0.0, 1.0], [0.0, -1.0]].view())
            .unwrap();
        for b in 0..3 {
            assert_abs_diff_eq!(dx[[b, 1]], 2.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(dx[[1, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_coordinate_mismatch_is_fatal() {
        let system = FurutaPendulum::default();
        let input = InputFunction::Zero;
        let g = StaticInputMatrix::Zero;
        let friction = [0.0, 0.0];
        let dynamics =
            HamiltonianDynamics::new(&system, &input, &g, &friction, ExecutionContext::inference());
        let err = dynamics
            .coordinate_derivatives(0.0, array![[0.0, 0.0]].view())
            .unwrap_err();
        assert!(matches!(err, Error::CoordinateMismatch { expected: 4, found: 2 }));
        assert!(err.is_config());
    }

    #[test]
    fn test_input_matrix_with_wrong_row_count() {
        struct ThreeRows;
        impl InputMatrix for ThreeRows {
            fn row(&self, coords: &Var, _ctx: &ExecutionContext) -> Result<Var> {
                Ok(coords.tape().zeros((3, 2)))
            }
        }
        let system = SimplePendulum::default();
        let input: InputFunction = "step".parse().unwrap();
        let friction = [0.0];
        let dynamics = HamiltonianDynamics::new(
            &system,
            &input,
            &ThreeRows,
            &friction,
            ExecutionContext::inference(),
        );
        let err = dynamics
            .coordinate_derivatives(0.0, Array2::<f64>::zeros((2, 2)).view())
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }
}
