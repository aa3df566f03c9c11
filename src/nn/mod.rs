//! Neural Network Module: Learned Hamiltonians and Their Training State
//!
//! - **Parameters**: values with stable identity, freezable
//! - **Layers**: [`Linear`], [`Mlp`], two activations
//! - **HamiltonianNet**: growable list of residual blocks
//! - **InputHnn**: learned Hamiltonian plus input matrix, the trained model
//! - **Optimizer**: AdamW keyed by parameter identity, linear LR decay

mod hamiltonian_net;
mod layers;
mod model;
mod optim;
mod parameter;

pub use hamiltonian_net::{GrowthEvent, HamiltonianNet, HamiltonianNetConfig, Routing};
pub use layers::{Activation, Linear, Mlp, MlpSpec, Module};
pub use model::{InputHnn, InputMatrixModel, LearnedInputMatrix};
pub use optim::{AdamW, AdamWConfig, LinearLr, Moments};
pub use parameter::{Gradients, ParamId, Parameter};
