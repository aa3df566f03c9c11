//! Input HNN: Learned Hamiltonian with a (Possibly Learned) Input Matrix
//!
//! The trainable system is
//!
//! ```text
//! ẋ = J ∇H_θ(x) − C ∂H_θ/∂p + u(t) G_φ(x)
//! ```
//!
//! with `H_θ` a [`HamiltonianNet`] and `G_φ` either a static row or a tanh
//! MLP. Each sub-network can be frozen as a group; a frozen group still
//! enters the rollout but receives no gradient.

use ndarray::{Array2, Array3};
use rand::Rng;

use super::hamiltonian_net::HamiltonianNet;
use super::layers::{Activation, Mlp, MlpSpec, Module};
use super::parameter::Parameter;
use crate::autodiff::Var;
use crate::context::ExecutionContext;
use crate::control::{InputFunction, InputMatrix, InputMatrixSpec, StaticInputMatrix};
use crate::dynamics::{integrate, stack_states, HamiltonianDynamics, TimeGrid};
use crate::error::{Error, Result};
use crate::systems::Hamiltonian;

/// Tanh MLP mapping coordinates to one input-gain row per batch item.
#[derive(Debug, Clone)]
pub struct LearnedInputMatrix {
    mlp: Mlp,
}

impl LearnedInputMatrix {
    pub fn new<R: Rng + ?Sized>(coord_dim: usize, hidden_dim: usize, hidden_layers: usize, rng: &mut R) -> Result<Self> {
        let spec = MlpSpec {
            input_dim: coord_dim,
            hidden_dim,
            hidden_layers,
            output_dim: coord_dim,
            activation: Activation::Tanh,
        };
        Ok(Self {
            mlp: Mlp::new("g_net", &spec, rng)?,
        })
    }
}

impl InputMatrix for LearnedInputMatrix {
    fn row(&self, coords: &Var, ctx: &ExecutionContext) -> Result<Var> {
        self.mlp.forward(coords, ctx)
    }
}

impl Module for LearnedInputMatrix {
    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        self.mlp.visit_parameters(visitor);
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        self.mlp.visit_parameters_mut(visitor);
    }
}

#[derive(Debug, Clone)]
pub enum InputMatrixModel {
    Static(StaticInputMatrix),
    Learned(LearnedInputMatrix),
}

impl InputMatrixModel {
    pub fn from_spec<R: Rng + ?Sized>(spec: &InputMatrixSpec, coord_dim: usize, rng: &mut R) -> Result<Self> {
        match spec {
            InputMatrixSpec::Learned {
                hidden_dim,
                hidden_layers,
            } => Ok(InputMatrixModel::Learned(LearnedInputMatrix::new(
                coord_dim,
                *hidden_dim,
                *hidden_layers,
                rng,
            )?)),
            other => other
                .as_static(coord_dim)
                .map(InputMatrixModel::Static)
                .ok_or_else(|| Error::InvalidConfig("input matrix has no static form".into())),
        }
    }

    pub fn is_learned(&self) -> bool {
        matches!(self, InputMatrixModel::Learned(_))
    }
}

impl InputMatrix for InputMatrixModel {
    fn row(&self, coords: &Var, ctx: &ExecutionContext) -> Result<Var> {
        match self {
            InputMatrixModel::Static(g) => g.row(coords, ctx),
            InputMatrixModel::Learned(g) => g.row(coords, ctx),
        }
    }
}

impl Module for InputMatrixModel {
    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        if let InputMatrixModel::Learned(g) = self {
            g.visit_parameters(visitor);
        }
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        if let InputMatrixModel::Learned(g) = self {
            g.visit_parameters_mut(visitor);
        }
    }
}

/// Sub-network seen through its group freeze flag.
struct Gated<'a, T> {
    inner: &'a T,
    trainable: bool,
}

impl Hamiltonian for Gated<'_, HamiltonianNet> {
    fn coord_dim(&self) -> usize {
        self.inner.coord_dim()
    }

    fn hamiltonian(&self, coords: &Var, ctx: &ExecutionContext) -> Result<Var> {
        self.inner.hamiltonian(coords, &ctx.with_grad(self.trainable))
    }
}

impl InputMatrix for Gated<'_, InputMatrixModel> {
    fn row(&self, coords: &Var, ctx: &ExecutionContext) -> Result<Var> {
        self.inner.row(coords, &ctx.with_grad(self.trainable))
    }
}

#[derive(Debug, Clone)]
pub struct InputHnn {
    h_net: HamiltonianNet,
    g_net: InputMatrixModel,
    input: InputFunction,
    friction: Vec<f64>,
    h_frozen: bool,
    g_frozen: bool,
}

impl InputHnn {
    pub fn new(
        h_net: HamiltonianNet,
        g_net: InputMatrixModel,
        input: InputFunction,
        friction: Vec<f64>,
    ) -> Result<Self> {
        if friction.len() != h_net.dof() {
            return Err(Error::InvalidConfig(format!(
                "{} friction coefficients for {} degrees of freedom",
                friction.len(),
                h_net.dof()
            )));
        }
        Ok(Self {
            h_net,
            g_net,
            input,
            friction,
            h_frozen: false,
            g_frozen: false,
        })
    }

    pub fn h_net(&self) -> &HamiltonianNet {
        &self.h_net
    }

    /// Mutable access for capacity growth.
    pub fn h_net_mut(&mut self) -> &mut HamiltonianNet {
        &mut self.h_net
    }

    pub fn g_net(&self) -> &InputMatrixModel {
        &self.g_net
    }

    pub fn input(&self) -> &InputFunction {
        &self.input
    }

    pub fn coord_dim(&self) -> usize {
        self.h_net.coord_dim()
    }

    pub fn freeze_h_net(&mut self, freeze: bool) {
        self.h_frozen = freeze;
    }

    pub fn freeze_g_net(&mut self, freeze: bool) {
        self.g_frozen = freeze;
    }

    pub fn is_h_frozen(&self) -> bool {
        self.h_frozen
    }

    pub fn is_g_frozen(&self) -> bool {
        self.g_frozen
    }

    /// Predicted states on the tape of `x0`, one `[batch, coord]` var per grid time.
    pub fn rollout(
        &self,
        x0: &Var,
        grid: &TimeGrid,
        step_size: f64,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Var>> {
        let h = Gated {
            inner: &self.h_net,
            trainable: !self.h_frozen,
        };
        let g = Gated {
            inner: &self.g_net,
            trainable: !self.g_frozen,
        };
        let dynamics = HamiltonianDynamics::new(&h, &self.input, &g, &self.friction, *ctx);
        integrate(&dynamics, x0, grid, step_size)
    }

    /// Plain-data prediction `[batch, time, coord]`.
    pub fn predict(&self, x0: &Array2<f64>, grid: &TimeGrid, step_size: f64) -> Result<Array3<f64>> {
        let dynamics = HamiltonianDynamics::new(
            &self.h_net,
            &self.input,
            &self.g_net,
            &self.friction,
            ExecutionContext::inference(),
        );
        let states = integrate(&dynamics, x0, grid, step_size)?;
        stack_states(&states)
    }
}

impl Module for InputHnn {
    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        self.h_net.visit_parameters(visitor);
        self.g_net.visit_parameters(visitor);
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        self.h_net.visit_parameters_mut(visitor);
        self.g_net.visit_parameters_mut(visitor);
    }
}
