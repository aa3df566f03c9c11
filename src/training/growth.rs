//! Capacity-Growth Strategy: Appending Residual Blocks on Schedule
//!
//! With `switch_steps = [s0, s1, ..., s_{n-1}]` the Hamiltonian net grows at
//! epochs `s0, s0 + s1, ..., s0 + ... + s_{n-2}`, i.e. whenever a new
//! curriculum block begins. Expanding nets freeze their existing blocks at
//! each growth; interpolating nets keep every block trainable. With
//! `block_hidden_dim` set, grown blocks use that hidden width instead of the
//! initial one (the "wide" expanding variant).

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::curriculum::cumulative;
use crate::error::{Error, Result};
use crate::nn::{GrowthEvent, HamiltonianNet, Module, Routing};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthConfig {
    /// Epochs per block; `None` follows the horizon schedule.
    #[serde(default)]
    pub switch_steps: Option<Vec<usize>>,
    /// Upper bound on the block count
    #[serde(default)]
    pub max_blocks: Option<usize>,
    /// Hidden width of grown blocks; `None` keeps the net's width.
    #[serde(default)]
    pub block_hidden_dim: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct GrowthStrategy {
    growth_epochs: Vec<usize>,
    max_blocks: Option<usize>,
    block_hidden_dim: Option<usize>,
}

impl GrowthStrategy {
    pub fn new(switch_steps: &[usize], max_blocks: Option<usize>) -> Result<Self> {
        if switch_steps.is_empty() {
            return Err(Error::InvalidConfig("growth schedule is empty".into()));
        }
        if max_blocks == Some(0) {
            return Err(Error::InvalidConfig("max_blocks must be positive".into()));
        }
        let mut growth_epochs = cumulative(switch_steps);
        growth_epochs.pop();
        Ok(Self {
            growth_epochs,
            max_blocks,
            block_hidden_dim: None,
        })
    }

    pub fn with_block_hidden_dim(mut self, hidden_dim: Option<usize>) -> Result<Self> {
        if hidden_dim == Some(0) {
            return Err(Error::InvalidConfig("grown blocks need a positive hidden width".into()));
        }
        self.block_hidden_dim = hidden_dim;
        Ok(self)
    }

    pub fn growth_epochs(&self) -> &[usize] {
        &self.growth_epochs
    }

    /// Grows `net` if `epoch` is a growth epoch and the block cap allows it.
    pub fn maybe_grow<R: Rng + ?Sized>(
        &self,
        epoch: usize,
        net: &mut HamiltonianNet,
        rng: &mut R,
    ) -> Result<Option<GrowthEvent>> {
        if !self.growth_epochs.contains(&epoch) {
            return Ok(None);
        }
        if let Some(cap) = self.max_blocks {
            if net.num_blocks() >= cap {
                return Ok(None);
            }
        }
        let freeze_previous = net.routing() == Routing::Expanding;
        let hidden_dim = self.block_hidden_dim.unwrap_or(net.config().hidden_dim);
        let event = net.grow_with_width(freeze_previous, hidden_dim, rng)?;
        info!(
            epoch,
            blocks = event.version,
            hidden_dim,
            new_parameters = event.new_parameters.len(),
            total_parameters = net.num_parameters(),
            "hamiltonian net grew"
        );
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Tape;
    use crate::context::ExecutionContext;
    use crate::nn::{Activation, HamiltonianNetConfig};
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn net(routing: Routing, rng: &mut StdRng) -> HamiltonianNet {
        HamiltonianNet::new(
            HamiltonianNetConfig {
                coord_dim: 4,
                hidden_dim: 6,
                hidden_layers: 2,
                activation: Activation::SinSquared,
                routing,
                initial_blocks: 1,
            },
            rng,
        )
        .unwrap()
    }

    #[test]
    fn test_grows_only_at_block_starts() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut h = net(Routing::Expanding, &mut rng);
        let strategy = GrowthStrategy::new(&[3, 2, 4], None).unwrap();
        assert_eq!(strategy.growth_epochs(), &[3, 5]);
        let grown: Vec<usize> = (0..12)
            .filter(|&e| strategy.maybe_grow(e, &mut h, &mut rng).unwrap().is_some())
            .collect();
        assert_eq!(grown, vec![3, 5]);
        assert_eq!(h.num_blocks(), 3);
    }

    #[test]
    fn test_growth_keeps_values_and_adds_parameters() {
        for routing in [Routing::Expanding, Routing::Interpolating] {
            let mut rng = StdRng::seed_from_u64(21);
            let mut h = net(routing, &mut rng);
            let before = h.snapshot();
            let count = h.num_parameters();
            let tape = Tape::new();
            let x = tape.constant(array![[0.1, 0.2, 3.0, -0.1]]);
            let out_before = h.forward(&x, &ExecutionContext::inference()).unwrap().to_array();

            let strategy = GrowthStrategy::new(&[1, 1], None).unwrap();
            let event = strategy.maybe_grow(1, &mut h, &mut rng).unwrap().unwrap();

            assert!(h.num_parameters() > count);
            assert!(!event.new_parameters.is_empty());
            let after = h.snapshot();
            for (id, value) in &before {
                let (_, now) = after.iter().find(|(i, _)| i == id).unwrap();
                assert_eq!(now, value);
            }
            let out_after = h.forward(&x, &ExecutionContext::inference()).unwrap().to_array();
            assert_eq!(out_after, out_before);
        }
    }

    #[test]
    fn test_block_cap() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut h = net(Routing::Interpolating, &mut rng);
        let strategy = GrowthStrategy::new(&[1, 1, 1, 1], Some(2)).unwrap();
        for epoch in 0..4 {
            strategy.maybe_grow(epoch, &mut h, &mut rng).unwrap();
        }
        assert_eq!(h.num_blocks(), 2);
    }

    #[test]
    fn test_wide_blocks_keep_output_at_growth() {
        for routing in [Routing::Expanding, Routing::Interpolating] {
            let mut rng = StdRng::seed_from_u64(8);
            let mut h = net(routing, &mut rng);
            let tape = Tape::new();
            let x = tape.constant(array![[0.4, -0.3, 2.9, 0.05], [-1.0, 0.2, 0.1, 0.0]]);
            let out_before = h.forward(&x, &ExecutionContext::inference()).unwrap().to_array();

            let strategy = GrowthStrategy::new(&[1, 1], None)
                .unwrap()
                .with_block_hidden_dim(Some(12))
                .unwrap();
            strategy.maybe_grow(1, &mut h, &mut rng).unwrap().unwrap();

            let base = h.blocks()[0].num_parameters();
            let wide = h.blocks()[1].num_parameters();
            // (4·12 + 12) + (12·12 + 12) + read-out
            let read_out = match routing {
                Routing::Expanding => 12 + 1,
                Routing::Interpolating => 12 * 4 + 4,
            };
            assert_eq!(wide, 60 + 156 + read_out);
            assert!(wide > base);
            let out_after = h.forward(&x, &ExecutionContext::inference()).unwrap().to_array();
            assert_eq!(out_after, out_before);
        }
    }

    #[test]
    fn test_zero_block_width_rejected() {
        let err = GrowthStrategy::new(&[1, 1], None)
            .unwrap()
            .with_block_hidden_dim(Some(0))
            .unwrap_err();
        assert!(err.is_config());
    }
}
