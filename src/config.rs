//! Experiment configuration loaded from JSON.
//!
//! ```json
//! {
//!   "system": { "type": "furuta", "c_q1": 0.0 },
//!   "generation": { "init": "near_zero", "num_trajectories": 125, "time_steps": 300 },
//!   "input": { "type": "chirp", "amplitude": 0.5, "f0": 0.1, "f1": 2.0, "duration": 10.0 },
//!   "input_matrix": { "type": "learned" },
//!   "model": { "hidden_dim": 90, "routing": "expanding" },
//!   "training": { "epochs": 1050, "alternating": true }
//! }
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::control::{InputFunction, InputMatrixSpec, StaticInputMatrix};
use crate::data::{DataLoader, TrajectoryDataset};
use crate::error::{Error, Result};
use crate::nn::{Activation, HamiltonianNet, HamiltonianNetConfig, InputHnn, InputMatrixModel, Routing};
use crate::systems::{Hamiltonian, MechanicalSystem, Pendulum};
use crate::training::TrainingConfig;
use crate::trajectory::{
    generate, generate_with_energy, GenerationConfig, InitialConditions, Trajectories, TrajectoriesWithEnergy,
};

/// Hamiltonian-net architecture; the coordinate count comes from the system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub hidden_dim: usize,
    pub hidden_layers: usize,
    pub activation: Activation,
    pub routing: Routing,
    pub initial_blocks: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 90,
            hidden_layers: 3,
            activation: Activation::SinSquared,
            routing: Routing::Expanding,
            initial_blocks: 1,
        }
    }
}

impl ModelConfig {
    pub fn hamiltonian_config(&self, coord_dim: usize) -> HamiltonianNetConfig {
        HamiltonianNetConfig {
            coord_dim,
            hidden_dim: self.hidden_dim,
            hidden_layers: self.hidden_layers,
            activation: self.activation,
            routing: self.routing,
            initial_blocks: self.initial_blocks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Share of trajectories used for training; the rest is held out.
    pub train_fraction: f64,
    pub batch_size: usize,
    pub shuffle: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.8,
            batch_size: 32,
            shuffle: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub system: Pendulum,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub input: InputFunction,
    /// Input matrix of the trained model
    #[serde(default)]
    pub input_matrix: InputMatrixSpec,
    /// Input matrix of the data-generating system; torque gain when unset.
    #[serde(default)]
    pub data_input_matrix: Option<StaticInputMatrix>,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub seed: u64,
}

impl ExperimentConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fraction = self.split.train_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "train_fraction {fraction} outside (0, 1]"
            )));
        }
        self.generation.validate()?;
        if let InputMatrixSpec::Fixed { row: Some(row) } = &self.input_matrix {
            if row.len() != self.system.coord_dim() {
                return Err(Error::CoordinateMismatch {
                    expected: self.system.coord_dim(),
                    found: row.len(),
                });
            }
        }
        Ok(())
    }

    pub fn data_input_matrix(&self) -> StaticInputMatrix {
        self.data_input_matrix
            .clone()
            .unwrap_or_else(|| StaticInputMatrix::torque(self.system.coord_dim()))
    }

    pub fn generate_data<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Trajectories> {
        generate(
            &self.system,
            &InitialConditions::Policy(self.generation.init),
            &self.generation,
            &self.input,
            &self.data_input_matrix(),
            rng,
        )
    }

    pub fn generate_data_with_energy<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<TrajectoriesWithEnergy> {
        generate_with_energy(
            &self.system,
            &InitialConditions::Policy(self.generation.init),
            &self.generation,
            &self.input,
            &self.data_input_matrix(),
            rng,
        )
    }

    /// Training loader and, when any trajectories are held out, a test loader.
    pub fn loaders(&self, trajectories: &Trajectories) -> Result<(DataLoader, Option<DataLoader>)> {
        let dataset = TrajectoryDataset::from_trajectories(trajectories)?;
        let n = dataset.len();
        let n_train = ((n as f64) * self.split.train_fraction).round() as usize;
        let batch_size = self.split.batch_size;
        if n_train == 0 {
            return Err(Error::InvalidConfig(format!(
                "train_fraction {} of {n} trajectories leaves no training data",
                self.split.train_fraction
            )));
        }
        if n_train >= n {
            let train = DataLoader::new(dataset, batch_size, self.split.shuffle, self.seed)?;
            return Ok((train, None));
        }
        let (train, test) = dataset.split_at(n_train)?;
        Ok((
            DataLoader::new(train, batch_size, self.split.shuffle, self.seed)?,
            Some(DataLoader::new(test, batch_size, false, self.seed)?),
        ))
    }

    pub fn build_model<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<InputHnn> {
        let coord_dim = self.system.coord_dim();
        let h_net = HamiltonianNet::new(self.model.hamiltonian_config(coord_dim), rng)?;
        let g_net = InputMatrixModel::from_spec(&self.input_matrix, coord_dim, rng)?;
        InputHnn::new(h_net, g_net, self.input.clone(), self.system.friction())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Module;
    use crate::training::Trainer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SMALL: &str = r#"{
        "system": { "type": "simple" },
        "generation": { "init": "random_closetozero", "num_trajectories": 5, "time_steps": 4 },
        "input": { "type": "step", "amplitude": 0.2, "t0": 0.0 },
        "input_matrix": { "type": "learned", "hidden_dim": 4, "hidden_layers": 1 },
        "model": { "hidden_dim": 6, "hidden_layers": 2, "routing": "interpolating" },
        "training": { "epochs": 2, "horizon": { "type": "constant", "horizon": 3 }, "alternating": true },
        "split": { "train_fraction": 0.6, "batch_size": 2 },
        "seed": 9
    }"#;

    #[test]
    fn test_small_experiment_end_to_end() {
        let config = ExperimentConfig::from_json(SMALL).unwrap();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let data = config.generate_data(&mut rng).unwrap();
        assert_eq!(data.states.dim(), (5, 4, 2));
        assert_eq!(data.times.len(), 4);

        let (mut train, test) = config.loaders(&data).unwrap();
        let mut test = test.unwrap();
        assert_eq!(train.dataset().len(), 3);
        assert_eq!(test.dataset().len(), 2);

        let model = config.build_model(&mut rng).unwrap();
        assert!(model.g_net().is_learned());
        assert!(model.num_parameters() > 0);

        let mut trainer = Trainer::new(config.training.clone(), model).unwrap();
        let logs = trainer.fit(&mut train, Some(&mut test)).unwrap();
        assert_eq!(logs.epochs_completed(), 2);
        assert_eq!(logs.test_epochs, vec![0]);
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = ExperimentConfig::from_json(
            r#"{ "system": { "type": "furuta" },
                 "generation": { "init": "near_pi", "num_trajectories": 2, "time_steps": 3 } }"#,
        )
        .unwrap();
        assert_eq!(config.input, InputFunction::Zero);
        assert_eq!(config.model, ModelConfig::default());
        assert_eq!(config.training.test_every, 10);
        assert_eq!(config.data_input_matrix(), StaticInputMatrix::torque(4));

        let data = config
            .generate_data_with_energy(&mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(data.energy.dim(), (2, 3));
        assert_eq!(data.derivatives.map(|d| d.dim()), Some((2, 3, 4)));
    }

    #[test]
    fn test_rejects_bad_configuration() {
        let bad_fraction = SMALL.replace("0.6", "1.5");
        assert!(ExperimentConfig::from_json(&bad_fraction).unwrap_err().is_config());

        let bad_tag = SMALL.replace("\"learned\"", "\"wavelet\"");
        assert!(ExperimentConfig::from_json(&bad_tag).unwrap_err().is_config());

        let bad_row = SMALL.replace(
            r#"{ "type": "learned", "hidden_dim": 4, "hidden_layers": 1 }"#,
            r#"{ "type": "fixed", "row": [0.0, 1.0, 0.0] }"#,
        );
        assert!(matches!(
            ExperimentConfig::from_json(&bad_row),
            Err(Error::CoordinateMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn test_split_leaving_no_training_data_is_rejected() {
        let config = ExperimentConfig::from_json(
            r#"{ "system": { "type": "simple" },
                 "generation": { "init": "near_zero", "num_trajectories": 1, "time_steps": 3 },
                 "split": { "train_fraction": 0.4 } }"#,
        )
        .unwrap();
        let data = config.generate_data(&mut StdRng::seed_from_u64(1)).unwrap();
        let err = config.loaders(&data).err().unwrap();
        assert!(err.is_config());

        let whole = ExperimentConfig {
            split: SplitConfig {
                train_fraction: 1.0,
                ..config.split
            },
            ..config
        };
        let (train, test) = whole.loaders(&data).unwrap();
        assert_eq!(train.dataset().len(), 1);
        assert!(test.is_none());
    }

    #[test]
    fn test_noise_level_validated_with_configuration() {
        let noisy = SMALL.replace(r#""time_steps": 4 }"#, r#""time_steps": 4, "noise_std": -0.5 }"#);
        assert!(ExperimentConfig::from_json(&noisy).unwrap_err().is_config());
    }

    #[test]
    fn test_wide_growth_from_configuration() {
        let wide = SMALL
            .replace(
                r#""horizon": { "type": "constant", "horizon": 3 }"#,
                r#""horizon": { "type": "scheduled", "horizon_list": [2, 3], "switch_steps": [1, 1] },
                   "growth": { "block_hidden_dim": 10 }"#,
            )
            .replace(r#""routing": "interpolating""#, r#""routing": "expanding""#);
        let config = ExperimentConfig::from_json(&wide).unwrap();
        assert_eq!(config.training.growth.as_ref().and_then(|g| g.block_hidden_dim), Some(10));

        let mut rng = StdRng::seed_from_u64(config.seed);
        let data = config.generate_data(&mut rng).unwrap();
        let (mut train, _) = config.loaders(&data).unwrap();
        let model = config.build_model(&mut rng).unwrap();
        let mut trainer = Trainer::new(config.training.clone(), model).unwrap();
        trainer.fit(&mut train, None).unwrap();

        let blocks = trainer.model().h_net().blocks();
        assert_eq!(blocks.len(), 2);
        // 2 -> 6 -> 6 -> 1 initially, 2 -> 10 -> 10 -> 1 when grown
        assert_eq!(blocks[0].num_parameters(), 18 + 42 + 7);
        assert_eq!(blocks[1].num_parameters(), 30 + 110 + 11);
    }
}
