//! Furuta Pendulum: Rotary Arm with a Free Pendulum Link
//!
//! Coordinates `(q1, p1, q2, p2)`: q1 is the pendulum angle (π hanging
//! down), q2 the arm angle. With the lumped constants
//!
//! ```text
//! Jp = Mp Lp² / 12     C1 = Jr + Mp Lr²     C2 = Mp Lp² / 4
//! C3 = −½ Mp Lp Lr     C4 = Jp + C2         C5 = ½ Mp g Lp
//! ```
//!
//! the mass matrix over `(q̇1, q̇2)` is
//!
//! ```text
//! M(q1) = | C4          C3 cos q1        |
//!         | C3 cos q1   C1 + C2 sin² q1  |
//! ```
//!
//! and `H = ½ pᵀ M⁻¹ p + C5 (cos q1 + 1)`.

use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::traits::{Hamiltonian, MechanicalSystem};
use crate::autodiff::Var;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};

/// Physical constants of the Furuta pendulum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FurutaPendulum {
    /// Sampling time Ts
    pub ts: f64,
    /// Gravitational acceleration
    pub g: f64,
    /// Arm inertia about the motor axis
    pub jr: f64,
    /// Arm length
    pub lr: f64,
    /// Pendulum mass
    pub mp: f64,
    /// Pendulum length
    pub lp: f64,
    /// Friction on the pendulum joint
    pub c_q1: f64,
    /// Friction on the arm joint
    pub c_q2: f64,
}

impl Default for FurutaPendulum {
    fn default() -> Self {
        Self {
            ts: 0.005,
            g: 9.81,
            jr: 5.72e-5,
            lr: 0.085,
            mp: 0.024,
            lp: 0.129,
            c_q1: 0.0,
            c_q2: 0.0,
        }
    }
}

/// Lumped inertia and gravity terms
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FurutaConstants {
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
    pub c4: f64,
    pub c5: f64,
}

impl FurutaPendulum {
    pub fn with_friction(mut self, c_q1: f64, c_q2: f64) -> Self {
        self.c_q1 = c_q1;
        self.c_q2 = c_q2;
        self
    }

    pub fn constants(&self) -> FurutaConstants {
        let jp = self.mp * self.lp * self.lp / 12.0;
        let c2 = self.mp * self.lp * self.lp / 4.0;
        FurutaConstants {
            c1: self.jr + self.mp * self.lr * self.lr,
            c2,
            c3: -0.5 * self.mp * self.lp * self.lr,
            c4: jp + c2,
            c5: 0.5 * self.mp * self.g * self.lp,
        }
    }
}

impl Hamiltonian for FurutaPendulum {
    fn coord_dim(&self) -> usize {
        4
    }

    fn hamiltonian(&self, coords: &Var, _ctx: &ExecutionContext) -> Result<Var> {
        let (batch, cols) = coords.shape();
        if cols != 4 {
            return Err(Error::ShapeMismatch {
                context: "furuta pendulum coordinates",
                expected: vec![batch, 4],
                found: vec![batch, cols],
            });
        }
        let k = self.constants();
        let q1 = coords.column(0);
        let p1 = coords.column(1);
        let p2 = coords.column(3);

        let cos_q1 = q1.cos();
        // C1 + C2 sin² q1
        let arm = (&q1.sin().square() * k.c2).add_scalar(k.c1);

        let numerator = &(&(&p1.square() * &arm) - &(&(&(&p1 * &p2) * &cos_q1) * (2.0 * k.c3)))
            + &(&p2.square() * k.c4);
        let determinant = &(&arm * k.c4) - &(&cos_q1.square() * (k.c3 * k.c3));
        let kinetic = &numerator / &(&determinant * 2.0);
        let potential = &cos_q1.add_scalar(1.0) * k.c5;
        Ok(&kinetic + &potential)
    }
}

impl MechanicalSystem for FurutaPendulum {
    fn name(&self) -> &'static str {
        "furuta_pendulum"
    }

    fn friction(&self) -> Vec<f64> {
        vec![self.c_q1, self.c_q2]
    }

    fn sampling_time(&self) -> f64 {
        self.ts
    }

    fn mechanical_energy(&self, coords: ArrayView2<f64>, velocities: ArrayView2<f64>) -> Array1<f64> {
        let k = self.constants();
        Array1::from_iter(coords.rows().into_iter().zip(velocities.rows()).map(|(x, v)| {
            let q1 = x[0];
            let (dq1, dq2) = (v[0], v[2]);
            let (s, c) = q1.sin_cos();
            0.5 * dq2 * dq2 * (k.c1 + k.c2 * s * s)
                + dq2 * dq1 * k.c3 * c
                + 0.5 * dq1 * dq1 * k.c4
                + k.c5 * c
                + k.c5
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Tape;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::f64::consts::PI;

    #[test]
    fn test_hanging_rest_has_zero_energy() {
        let system = FurutaPendulum::default();
        let tape = Tape::new();
        let x = tape.constant(array![[PI, 0.0, 0.3, 0.0]]);
        let h = system.hamiltonian(&x, &ExecutionContext::inference()).unwrap();
        assert_abs_diff_eq!(h.item(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hamiltonian_equals_energy_along_velocities() {
        // q̇ = ∂H/∂p, so the closed-form energy must reproduce H
        let system = FurutaPendulum::default();
        let tape = Tape::new();
        let x = tape.leaf(array![[2.5, 1e-3, 0.4, -2e-3], [0.2, -4e-4, -1.0, 5e-4]]);
        let h = system.hamiltonian(&x, &ExecutionContext::inference()).unwrap();
        let grad = tape.grad(&h.sum_all(), &[x.clone()]).unwrap().remove(0).to_array();
        let velocities = array![
            [grad[[0, 1]], 0.0, grad[[0, 3]], 0.0],
            [grad[[1, 1]], 0.0, grad[[1, 3]], 0.0]
        ];
        let energy = system.mechanical_energy(x.value().view(), velocities.view());
        let h = h.to_array();
        for b in 0..2 {
            assert_abs_diff_eq!(energy[b], h[[b, 0]], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_rejects_wrong_coordinate_count() {
        let tape = Tape::new();
        let x = tape.constant(array![[0.0, 0.0]]);
        let err = FurutaPendulum::default()
            .hamiltonian(&x, &ExecutionContext::inference())
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }
}
