//! # HNN-Dynamics
//!
//! Hamiltonian Neural Networks for Pendulum Dynamics: Learning Energy
//! Functions Through a Differentiable Fixed-Step Solver
//!
//! ## Theoretical Framework
//!
//! A conservative mechanical system with generalized coordinates
//! `x = (q₁, p₁, …, q_n, p_n)` evolves as
//!
//!   q̇ = ∂H/∂p,   ṗ = −∂H/∂q − C ∂H/∂p + u(t) G(x)
//!
//! where `H` is the total energy, `C` a diagonal friction matrix and
//! `u(t) G(x)` an external forcing. Replacing `H` by a neural network `H_θ`
//! and integrating with RK4 gives a model whose trajectories conserve a
//! learned energy by construction.
//!
//! ### Methodology
//!
//! 1. **Reference data**: trajectories of the simple and Furuta pendulums
//!    from their analytic Hamiltonians, with mechanical-energy checks
//!
//! 2. **Curriculum**: the rollout horizon grows in scheduled blocks, so
//!    short-term dynamics are fitted before long-term ones
//!
//! 3. **Capacity growth**: residual blocks are appended to `H_θ` as the
//!    horizon grows, leaving the learned function unchanged at the
//!    moment of growth
//!
//! 4. **Alternating training**: the input matrix `G_φ` and the
//!    Hamiltonian `H_θ` are optimised in turn
//!
//! ## Module Map
//!
//! - [`autodiff`]: reverse-mode tape with higher-order gradients
//! - [`systems`]: analytic pendulum Hamiltonians and energies
//! - [`control`]: input functions `u(t)` and input matrices `G`
//! - [`dynamics`]: Hamiltonian vector field and the RK4 integrator
//! - [`trajectory`]: initial conditions, data generation, energy evaluation
//! - [`nn`]: layers, the growable Hamiltonian net, AdamW
//! - [`training`]: curriculum, growth, losses and the training loop

pub mod autodiff;
pub mod config;
pub mod context;
pub mod control;
pub mod data;
pub mod dynamics;
pub mod error;
pub mod nn;
pub mod systems;
pub mod training;
pub mod trajectory;

pub use error::{Error, Result};

pub use context::{Device, ExecutionContext};

pub use config::{ExperimentConfig, ModelConfig, SplitConfig};

pub use systems::{
    FurutaPendulum,
    Hamiltonian,
    MechanicalSystem,
    Pendulum,
    SimplePendulum,
};

pub use control::{InputFunction, InputMatrix, InputMatrixSpec, StaticInputMatrix};

pub use dynamics::{integrate, HamiltonianDynamics, TimeGrid, VectorField};

pub use trajectory::{
    energy_drift,
    energy_from_velocities,
    evaluate_energy,
    generate,
    generate_with_energy,
    CoordinateKind,
    GenerationConfig,
    InitPolicy,
    InitialConditions,
    Trajectories,
    TrajectoriesWithEnergy,
};

pub use data::{Batch, DataLoader, TrajectoryDataset};

pub use nn::{HamiltonianNet, HamiltonianNetConfig, InputHnn, Routing};

pub use training::{
    CurriculumScheduler,
    GrowthStrategy,
    LossKind,
    Trainer,
    TrainingConfig,
    TrainingLogs,
};
