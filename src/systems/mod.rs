//! Physical Systems Module: Pendulums with Known Hamiltonians
//!
//! Implements the two reference systems whose trajectories the learned
//! models are trained on:
//!
//! - **Simple pendulum**: one degree of freedom, `(q, p)`
//! - **Furuta pendulum**: rotary arm plus pendulum link, `(q1, p1, q2, p2)`
//!
//! [`Pendulum`] is the closed set of systems a configuration can name.

mod furuta;
mod simple_pendulum;
mod traits;

pub use furuta::{FurutaConstants, FurutaPendulum};
pub use simple_pendulum::SimplePendulum;
pub use traits::{Hamiltonian, MechanicalSystem};

use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::autodiff::Var;
use crate::context::ExecutionContext;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pendulum {
    Simple(SimplePendulum),
    Furuta(FurutaPendulum),
}

impl Pendulum {
    fn inner(&self) -> &dyn MechanicalSystem {
        match self {
            Pendulum::Simple(s) => s,
            Pendulum::Furuta(f) => f,
        }
    }
}

impl Hamiltonian for Pendulum {
    fn coord_dim(&self) -> usize {
        self.inner().coord_dim()
    }

    fn hamiltonian(&self, coords: &Var, ctx: &ExecutionContext) -> Result<Var> {
        self.inner().hamiltonian(coords, ctx)
    }
}

impl MechanicalSystem for Pendulum {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn friction(&self) -> Vec<f64> {
        self.inner().friction()
    }

    fn sampling_time(&self) -> f64 {
        self.inner().sampling_time()
    }

    fn mechanical_energy(&self, coords: ArrayView2<f64>, velocities: ArrayView2<f64>) -> Array1<f64> {
        self.inner().mechanical_energy(coords, velocities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pendulum_from_json_uses_defaults() {
        let p: Pendulum = serde_json::from_str(r#"{"type": "furuta", "c_q1": 0.01}"#).unwrap();
        assert_eq!(p.coord_dim(), 4);
        assert_eq!(p.friction(), vec![0.01, 0.0]);
        assert_eq!(p.sampling_time(), 0.005);

        let s: Pendulum = serde_json::from_str(r#"{"type": "simple"}"#).unwrap();
        assert_eq!(s.name(), "simple_pendulum");
        assert_eq!(s.sampling_time(), 0.05);
    }
}
