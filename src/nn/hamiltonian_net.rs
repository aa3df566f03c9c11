//! Hamiltonian Net: Versioned List of Residual Blocks
//!
//! The learned Hamiltonian is an ordered list of MLP blocks plus a routing
//! policy describing what each block receives:
//!
//! ```text
//! Expanding      H(x) = Σₖ blockₖ(x)                blockₖ : ℝᵈ → ℝ
//! Interpolating  z₀ = x,  zₖ₊₁ = zₖ + blockₖ(zₖ)    blockₖ : ℝᵈ → ℝᵈ
//!                H(x) = head(z_K)                    head   : ℝᵈ → ℝ
//! ```
//!
//! Growth appends a block whose read-out layer is zero, so the represented
//! function is unchanged at the instant of growth and no existing parameter
//! is touched. A grown block may be wider than the initial ones. A plain MLP
//! Hamiltonian is the Expanding net with one block.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::layers::{Activation, Mlp, MlpSpec, Module};
use super::parameter::{ParamId, Parameter};
use crate::autodiff::Var;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::systems::Hamiltonian;

/// How inputs are routed to blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    /// Every block sees the original coordinates; outputs are summed.
    Expanding,
    /// Blocks are chained residually; a head maps the result to a scalar.
    Interpolating,
}

impl FromStr for Routing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "expanding" => Ok(Routing::Expanding),
            "interpolating" | "interp" => Ok(Routing::Interpolating),
            other => Err(Error::UnknownGrowthVariant(other.to_string())),
        }
    }
}

/// Architecture of the learned Hamiltonian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HamiltonianNetConfig {
    /// Number of coordinates (2 or 4)
    pub coord_dim: usize,
    pub hidden_dim: usize,
    pub hidden_layers: usize,
    pub activation: Activation,
    pub routing: Routing,
    /// Blocks present before any growth
    #[serde(default = "default_initial_blocks")]
    pub initial_blocks: usize,
}

fn default_initial_blocks() -> usize {
    1
}

/// Record of a growth event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthEvent {
    /// Block count after growth
    pub version: usize,
    pub new_parameters: Vec<ParamId>,
}

#[derive(Debug, Clone)]
pub struct HamiltonianNet {
    config: HamiltonianNetConfig,
    blocks: Vec<Mlp>,
    head: Option<Mlp>,
}

impl HamiltonianNet {
    pub fn new<R: Rng + ?Sized>(config: HamiltonianNetConfig, rng: &mut R) -> Result<Self> {
        if config.coord_dim == 0 || config.coord_dim % 2 != 0 {
            return Err(Error::InvalidConfig(format!(
                "coordinate dimension must be a positive even number, got {}",
                config.coord_dim
            )));
        }
        if config.initial_blocks == 0 {
            return Err(Error::InvalidConfig(
                "hamiltonian net needs at least one block".into(),
            ));
        }
        let head = match config.routing {
            Routing::Expanding => None,
            Routing::Interpolating => Some(Mlp::new("h_net.head", &Self::head_spec(&config), rng)?),
        };
        let mut net = Self {
            config,
            blocks: Vec::new(),
            head,
        };
        for k in 0..config.initial_blocks {
            let mut block = Mlp::new(&format!("h_net.block{k}"), &net.block_spec(config.hidden_dim), rng)?;
            // residual increments of later blocks start at zero
            if config.routing == Routing::Interpolating || k > 0 {
                block.zero_output();
            }
            net.blocks.push(block);
        }
        Ok(net)
    }

    fn block_spec(&self, hidden_dim: usize) -> MlpSpec {
        let output_dim = match self.config.routing {
            Routing::Expanding => 1,
            Routing::Interpolating => self.config.coord_dim,
        };
        MlpSpec {
            input_dim: self.config.coord_dim,
            hidden_dim,
            hidden_layers: self.config.hidden_layers,
            output_dim,
            activation: self.config.activation,
        }
    }

    fn head_spec(config: &HamiltonianNetConfig) -> MlpSpec {
        MlpSpec {
            input_dim: config.coord_dim,
            hidden_dim: config.hidden_dim,
            hidden_layers: config.hidden_layers,
            output_dim: 1,
            activation: config.activation,
        }
    }

    pub fn config(&self) -> &HamiltonianNetConfig {
        &self.config
    }

    pub fn routing(&self) -> Routing {
        self.config.routing
    }

    /// Number of blocks, which doubles as the structural version.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Mlp] {
        &self.blocks
    }

    /// Appends a zero-output block. With `freeze_previous`, every existing
    /// block stops training; the head (if any) stays trainable.
    pub fn grow<R: Rng + ?Sized>(&mut self, freeze_previous: bool, rng: &mut R) -> Result<GrowthEvent> {
        self.grow_with_width(freeze_previous, self.config.hidden_dim, rng)
    }

    /// [`HamiltonianNet::grow`] with a hidden width of `hidden_dim` for the new block.
    pub fn grow_with_width<R: Rng + ?Sized>(
        &mut self,
        freeze_previous: bool,
        hidden_dim: usize,
        rng: &mut R,
    ) -> Result<GrowthEvent> {
        let k = self.blocks.len();
        let mut block = Mlp::new(&format!("h_net.block{k}"), &self.block_spec(hidden_dim), rng)?;
        block.zero_output();

        if freeze_previous {
            for old in &mut self.blocks {
                old.set_trainable(false);
            }
        }

        let mut new_parameters = Vec::new();
        block.visit_parameters(&mut |p| new_parameters.push(p.id()));
        self.blocks.push(block);

        Ok(GrowthEvent {
            version: self.blocks.len(),
            new_parameters,
        })
    }

    pub fn forward(&self, coords: &Var, ctx: &ExecutionContext) -> Result<Var> {
        match self.config.routing {
            Routing::Expanding => {
                let mut total: Option<Var> = None;
                for block in &self.blocks {
                    let out = block.forward(coords, ctx)?;
                    total = Some(match total {
                        Some(acc) => &acc + &out,
                        None => out,
                    });
                }
                total.ok_or_else(|| Error::InvalidConfig("hamiltonian net has no blocks".into()))
            }
            Routing::Interpolating => {
                let mut z = coords.clone();
                for block in &self.blocks {
                    z = &z + &block.forward(&z, ctx)?;
                }
                match &self.head {
                    Some(head) => head.forward(&z, ctx),
                    None => Err(Error::InvalidConfig(
                        "interpolating hamiltonian net is missing its head".into(),
                    )),
                }
            }
        }
    }
}

impl Module for HamiltonianNet {
    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        for block in &self.blocks {
            block.visit_parameters(visitor);
        }
        if let Some(head) = &self.head {
            head.visit_parameters(visitor);
        }
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        for block in &mut self.blocks {
            block.visit_parameters_mut(visitor);
        }
        if let Some(head) = &mut self.head {
            head.visit_parameters_mut(visitor);
        }
    }
}

impl Hamiltonian for HamiltonianNet {
    fn coord_dim(&self) -> usize {
        self.config.coord_dim
    }

    fn hamiltonian(&self, coords: &Var, ctx: &ExecutionContext) -> Result<Var> {
        self.forward(coords, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Tape;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(routing: Routing) -> HamiltonianNetConfig {
        HamiltonianNetConfig {
            coord_dim: 2,
            hidden_dim: 6,
            hidden_layers: 1,
            activation: Activation::SinSquared,
            routing,
            initial_blocks: 1,
        }
    }

    fn eval(net: &HamiltonianNet) -> ndarray::Array2<f64> {
        let tape = Tape::new();
        let x = tape.constant(array![[0.3, -0.2], [1.5, 0.7], [-2.0, 0.0]]);
        net.forward(&x, &ExecutionContext::inference()).unwrap().to_array()
    }

    #[test]
    fn test_growth_preserves_function_and_values() {
        for routing in [Routing::Expanding, Routing::Interpolating] {
            let mut rng = StdRng::seed_from_u64(11);
            let mut net = HamiltonianNet::new(config(routing), &mut rng).unwrap();
            let before_values = net.snapshot();
            let before_out = eval(&net);
            let before_count = net.num_parameters();

            let event = net.grow(routing == Routing::Expanding, &mut rng).unwrap();

            assert_eq!(event.version, 2);
            assert!(net.num_parameters() > before_count);
            let after_values = net.snapshot();
            for (id, value) in &before_values {
                let (_, now) = after_values.iter().find(|(i, _)| i == id).unwrap();
                assert_eq!(now, value, "parameter {:?} changed during growth", id);
            }
            assert_eq!(eval(&net), before_out);
        }
    }

    #[test]
    fn test_expanding_growth_freezes_previous_blocks() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut net = HamiltonianNet::new(config(Routing::Expanding), &mut rng).unwrap();
        net.grow(true, &mut rng).unwrap();
        let mut trainable = Vec::new();
        net.blocks()[0].visit_parameters(&mut |p| trainable.push(p.is_trainable()));
        assert!(trainable.iter().all(|t| !t));
        let mut fresh = Vec::new();
        net.blocks()[1].visit_parameters(&mut |p| fresh.push(p.is_trainable()));
        assert!(fresh.iter().all(|t| *t));
    }

    #[test]
    fn test_odd_coordinate_count_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut cfg = config(Routing::Expanding);
        cfg.coord_dim = 3;
        assert!(HamiltonianNet::new(cfg, &mut rng).unwrap_err().is_config());
    }
}
