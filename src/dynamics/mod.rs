//! Dynamics Module: Vector Fields and Their Integration
//!
//! - [`HamiltonianDynamics`]: Hamilton's equations with friction and input
//! - [`integrate`]: fixed-step RK4 over a [`TimeGrid`]

mod integrator;
mod vector_field;

pub use integrator::{integrate, stack_states, OdeState, TimeGrid};
pub use vector_field::{HamiltonianDynamics, VectorField};
