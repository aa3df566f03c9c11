//! System Traits: Standardized API for Hamiltonian Systems
//!
//! Every model that can drive the dynamics function, analytic or learned,
//! implements [`Hamiltonian`]. Physical pendulums additionally implement
//! [`MechanicalSystem`], which carries what the learned models do not know:
//! friction, sampling interval and a closed-form energy in terms of
//! velocities.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Hamiltonian Trait                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  + coord_dim()         - Length of (q1, p1, q2, p2, ...)    │
//! │  + hamiltonian()       - H(coords) as [batch, 1]            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  MechanicalSystem Trait                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  + friction()          - Damping per degree of freedom      │
//! │  + sampling_time()     - Ts                                 │
//! │  + mechanical_energy() - Kinetic + potential from q, q̇      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Coordinates are interleaved position/momentum pairs: index `2k` is a
//! position, `2k + 1` its conjugate momentum.

use ndarray::{Array1, ArrayView2};

use crate::autodiff::Var;
use crate::context::ExecutionContext;
use crate::error::Result;

/// Differentiable scalar energy of generalized coordinates.
pub trait Hamiltonian {
    /// Number of coordinates (always even)
    fn coord_dim(&self) -> usize;

    /// Number of degrees of freedom
    fn dof(&self) -> usize {
        self.coord_dim() / 2
    }

    /// Evaluate `H` on a `[batch, coord_dim]` var, returning `[batch, 1]`.
    fn hamiltonian(&self, coords: &Var, ctx: &ExecutionContext) -> Result<Var>;
}

/// A physical pendulum with known constants.
pub trait MechanicalSystem: Hamiltonian {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Linear friction coefficient per degree of freedom
    fn friction(&self) -> Vec<f64>;

    /// Sampling interval `Ts`
    fn sampling_time(&self) -> f64;

    /// Closed-form mechanical energy per batch row.
    ///
    /// `velocities` holds time derivatives of the full coordinate vector;
    /// only the position-derivative columns (`2k`) are read.
    fn mechanical_energy(&self, coords: ArrayView2<f64>, velocities: ArrayView2<f64>) -> Array1<f64>;
}
