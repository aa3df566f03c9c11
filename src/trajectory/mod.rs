//! Trajectory Module: Ground-Truth Data and Energy Checks
//!
//! - [`generate`]: sample initial states and integrate the physical system
//! - [`evaluate_energy`]: recompute derivatives and mechanical energy along
//!   any coordinate sequence

mod energy;
mod generator;
mod init;

pub use energy::{energy_drift, energy_from_velocities, evaluate_energy};
pub use generator::{
    generate, generate_with_energy, CoordinateKind, GenerationConfig, Trajectories, TrajectoriesWithEnergy,
};
pub use init::{InitPolicy, InitialConditions};
