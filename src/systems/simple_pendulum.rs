//! Simple Pendulum: Point Mass on a Rigid Rod
//!
//! With angle q (zero hanging down) and angular momentum p:
//!
//!   H(q, p) = p² / (2 m l²) + m g l (1 − cos q)
//!
//! so that q̇ = ∂H/∂p = p / (m l²) and ṗ = −∂H/∂q − C q̇ + u·g₂.

use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::traits::{Hamiltonian, MechanicalSystem};
use crate::autodiff::Var;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};

/// Physical constants of the simple pendulum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplePendulum {
    /// Sampling time Ts
    pub ts: f64,
    /// Friction coefficient
    pub friction: f64,
    /// Mass
    pub m: f64,
    /// Gravitational acceleration
    pub g: f64,
    /// Rod length
    pub l: f64,
}

impl Default for SimplePendulum {
    fn default() -> Self {
        Self {
            ts: 0.05,
            friction: 0.0,
            m: 1.0,
            g: 9.81,
            l: 1.0,
        }
    }
}

impl SimplePendulum {
    pub fn new(m: f64, g: f64, l: f64) -> Self {
        Self {
            m,
            g,
            l,
            ..Self::default()
        }
    }

    pub fn with_friction(mut self, friction: f64) -> Self {
        self.friction = friction;
        self
    }

    /// Moment of inertia about the pivot
    fn inertia(&self) -> f64 {
        self.m * self.l * self.l
    }
}

impl Hamiltonian for SimplePendulum {
    fn coord_dim(&self) -> usize {
        2
    }

    fn hamiltonian(&self, coords: &Var, _ctx: &ExecutionContext) -> Result<Var> {
        let (batch, cols) = coords.shape();
        if cols != 2 {
            return Err(Error::ShapeMismatch {
                context: "simple pendulum coordinates",
                expected: vec![batch, 2],
                found: vec![batch, cols],
            });
        }
        let q = coords.column(0);
        let p = coords.column(1);
        let kinetic = &p.square() * (0.5 / self.inertia());
        let potential = &(-&q.cos()).add_scalar(1.0) * (self.m * self.g * self.l);
        Ok(&kinetic + &potential)
    }
}

impl MechanicalSystem for SimplePendulum {
    fn name(&self) -> &'static str {
        "simple_pendulum"
    }

    fn friction(&self) -> Vec<f64> {
        vec![self.friction]
    }

    fn sampling_time(&self) -> f64 {
        self.ts
    }

    fn mechanical_energy(&self, coords: ArrayView2<f64>, velocities: ArrayView2<f64>) -> Array1<f64> {
        Array1::from_iter(coords.rows().into_iter().zip(velocities.rows()).map(|(x, v)| {
            let (q, dq) = (x[0], v[0]);
            0.5 * self.inertia() * dq * dq + self.m * self.g * self.l * (1.0 - q.cos())
        }))
    }
}
