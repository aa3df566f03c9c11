//! Training Loop: Curriculum, Growth, Alternating Passes
//!
//! One epoch:
//!
//! ```text
//! select horizon ──► maybe grow H ──► for each batch:
//!                                        [alternating] G pass (H frozen)
//!                                                      H pass (G frozen)
//!                                        rollout ─► loss ─► backward
//!                                        clip ─► AdamW step ─► LR decay
//!                                   ──► held-out loss (every test_every)
//! ```
//!
//! The tape lives for one optimizer step. Logs are appended only when an
//! epoch completes, so an aborted run leaves consistent logs behind.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::curriculum::{CurriculumScheduler, HorizonPolicy};
use super::growth::{GrowthConfig, GrowthStrategy};
use super::loss::{minmax_denominator, LossKind, TrajectoryLoss};
use crate::autodiff::Tape;
use crate::context::ExecutionContext;
use crate::data::{Batch, DataLoader};
use crate::dynamics::TimeGrid;
use crate::error::{Error, Result};
use crate::nn::{AdamW, AdamWConfig, Gradients, InputHnn, LinearLr, Module};

/// Linear learning-rate decay. Once the epoch index exceeds `begin_decay`,
/// the factor moves after every optimizer step, reaching `end_factor` after
/// `epochs - begin_decay` steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrDecayConfig {
    pub begin_decay: usize,
    #[serde(default = "default_end_factor")]
    pub end_factor: f64,
}

fn default_end_factor() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    /// Integrator step; `None` uses the data sampling interval.
    pub step_size: Option<f64>,
    pub horizon: HorizonPolicy,
    pub growth: Option<GrowthConfig>,
    /// Train G with H frozen, then H with G frozen, on every batch.
    pub alternating: bool,
    pub loss: LossKind,
    pub loss_weights: Option<Vec<f64>>,
    pub rescale_loss: bool,
    /// Global gradient-norm bound; `None` disables clipping.
    pub grad_clip: Option<f64>,
    pub optimizer: AdamWConfig,
    pub lr_decay: Option<LrDecayConfig>,
    pub test_every: usize,
    /// Record per-parameter gradient norms before and after clipping.
    pub collect_grads: bool,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 1050,
            step_size: None,
            horizon: HorizonPolicy::default(),
            growth: None,
            alternating: false,
            loss: LossKind::L2,
            loss_weights: None,
            rescale_loss: false,
            grad_clip: Some(1.0),
            optimizer: AdamWConfig::default(),
            lr_decay: None,
            test_every: 10,
            collect_grads: false,
            seed: 0,
        }
    }
}

/// Which parameter group a step updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Joint,
    InputMatrix,
    Hamiltonian,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientRecord {
    pub epoch: usize,
    pub batch: usize,
    pub pass: Pass,
    pub parameters: Vec<String>,
    pub preclip: Vec<f64>,
    pub postclip: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthRecord {
    pub epoch: usize,
    pub blocks: usize,
    pub new_parameters: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingLogs {
    /// Sum of mini-batch losses per epoch
    pub train_loss: Vec<f64>,
    pub test_loss: Vec<f64>,
    pub test_epochs: Vec<usize>,
    pub horizons: Vec<usize>,
    pub learning_rates: Vec<f64>,
    pub growth: Vec<GrowthRecord>,
    pub gradients: Vec<GradientRecord>,
}

impl TrainingLogs {
    pub fn epochs_completed(&self) -> usize {
        self.train_loss.len()
    }
}

pub struct Trainer {
    config: TrainingConfig,
    model: InputHnn,
    optimizer: AdamW,
    lr_schedule: Option<LinearLr>,
    curriculum: CurriculumScheduler,
    growth: Option<GrowthStrategy>,
    loss: TrajectoryLoss,
    logs: TrainingLogs,
    rng: StdRng,
    /// Optimizer steps taken so far, over all epochs and passes
    steps: usize,
    train_denominator: Option<Array1<f64>>,
    test_denominator: Option<(usize, Array1<f64>)>,
}

impl Trainer {
    pub fn new(config: TrainingConfig, model: InputHnn) -> Result<Self> {
        if config.test_every == 0 {
            return Err(Error::InvalidConfig("test_every must be positive".into()));
        }
        if let Some(step) = config.step_size {
            if !(step > 0.0 && step.is_finite()) {
                return Err(Error::InvalidConfig(format!("integrator step {step} must be positive")));
            }
        }
        if let Some(max) = config.grad_clip {
            if !(max > 0.0) {
                return Err(Error::InvalidConfig(format!("gradient clip {max} must be positive")));
            }
        }

        let curriculum = CurriculumScheduler::new(&config.horizon)?;
        let growth = match &config.growth {
            None => None,
            Some(growth) => {
                let steps = match (&growth.switch_steps, &config.horizon) {
                    (Some(steps), _) => steps.clone(),
                    (None, HorizonPolicy::Scheduled { switch_steps, .. }) => switch_steps.clone(),
                    (None, HorizonPolicy::Constant { .. }) => {
                        return Err(Error::InvalidConfig(
                            "growth needs switch steps when the horizon is constant".into(),
                        ))
                    }
                };
                Some(GrowthStrategy::new(&steps, growth.max_blocks)?.with_block_hidden_dim(growth.block_hidden_dim)?)
            }
        };
        let lr_schedule = config
            .lr_decay
            .map(|d| LinearLr::new(1.0, d.end_factor, config.epochs.saturating_sub(d.begin_decay)));
        let loss = TrajectoryLoss::new(config.loss, config.loss_weights.clone(), config.rescale_loss);

        Ok(Self {
            optimizer: AdamW::new(config.optimizer),
            rng: StdRng::seed_from_u64(config.seed),
            lr_schedule,
            curriculum,
            growth,
            loss,
            model,
            config,
            logs: TrainingLogs::default(),
            steps: 0,
            train_denominator: None,
            test_denominator: None,
        })
    }

    pub fn model(&self) -> &InputHnn {
        &self.model
    }

    pub fn into_model(self) -> InputHnn {
        self.model
    }

    pub fn optimizer(&self) -> &AdamW {
        &self.optimizer
    }

    pub fn logs(&self) -> &TrainingLogs {
        &self.logs
    }

    pub fn optimizer_steps(&self) -> usize {
        self.steps
    }

    /// Runs every remaining epoch. On error the logs keep all completed epochs.
    pub fn fit(&mut self, train: &mut DataLoader, mut test: Option<&mut DataLoader>) -> Result<&TrainingLogs> {
        info!(
            epochs = self.config.epochs,
            batches = train.len(),
            parameters = self.model.num_parameters(),
            alternating = self.config.alternating,
            "training started"
        );
        while self.logs.epochs_completed() < self.config.epochs {
            self.run_epoch(train, test.as_deref_mut())?;
        }
        Ok(&self.logs)
    }

    /// Runs the next epoch: horizon selection, growth, training, evaluation.
    /// A failed epoch leaves no log entry.
    pub fn run_epoch(&mut self, train: &mut DataLoader, test: Option<&mut DataLoader>) -> Result<()> {
        if train.is_empty() {
            return Err(Error::InvalidConfig("training set is empty".into()));
        }
        let epoch = self.logs.epochs_completed();
        let (changed, horizon) = self.curriculum.select_horizon(epoch);
        if changed {
            info!(epoch, horizon, "rollout horizon changed");
        }

        if let Some(growth) = &self.growth {
            if let Some(event) = growth.maybe_grow(epoch, self.model.h_net_mut(), &mut self.rng)? {
                self.logs.growth.push(GrowthRecord {
                    epoch,
                    blocks: event.version,
                    new_parameters: event.new_parameters.len(),
                });
            }
        }

        let outcome = self.train_epoch(train, epoch, horizon, changed);
        self.set_pass(Pass::Joint);
        let (train_loss, gradients) = outcome?;

        let mut test_loss = None;
        if let Some(loader) = test {
            if epoch % self.config.test_every == 0 {
                test_loss = Some(self.evaluate(loader, horizon, epoch)?);
            }
        }

        self.logs.train_loss.push(train_loss);
        self.logs.horizons.push(horizon);
        self.logs.learning_rates.push(self.optimizer.lr());
        self.logs.gradients.extend(gradients);
        if let Some(value) = test_loss {
            self.logs.test_loss.push(value);
            self.logs.test_epochs.push(epoch);
        }
        info!(
            epoch,
            horizon,
            train_loss,
            test_loss = ?test_loss,
            lr = self.optimizer.lr(),
            blocks = self.model.h_net().num_blocks(),
            "epoch complete"
        );
        Ok(())
    }

    /// Summed mini-batch loss of one epoch plus any gradient records.
    fn train_epoch(
        &mut self,
        train: &mut DataLoader,
        epoch: usize,
        horizon: usize,
        mut refresh_denominator: bool,
    ) -> Result<(f64, Vec<GradientRecord>)> {
        let passes: &[Pass] = if self.config.alternating {
            &[Pass::InputMatrix, Pass::Hamiltonian]
        } else {
            &[Pass::Joint]
        };
        let mut total = 0.0;
        let mut records = Vec::new();
        for (index, batch) in train.epoch().iter().enumerate() {
            let grid = batch.validate()?.truncated(horizon)?;
            if self.loss.rescales() && refresh_denominator {
                self.train_denominator = Some(minmax_denominator(batch.window(horizon)?));
                refresh_denominator = false;
            }
            for &pass in passes {
                self.set_pass(pass);
                let (value, record) = self.train_step(batch, &grid, horizon, epoch, index, pass)?;
                total += value;
                records.extend(record);
            }
        }
        Ok((total, records))
    }

    fn set_pass(&mut self, pass: Pass) {
        let (h_frozen, g_frozen) = match pass {
            Pass::Joint => (false, false),
            Pass::InputMatrix => (true, false),
            Pass::Hamiltonian => (false, true),
        };
        self.model.freeze_h_net(h_frozen);
        self.model.freeze_g_net(g_frozen);
    }

    fn step_size(&self, grid: &TimeGrid) -> f64 {
        self.config.step_size.unwrap_or_else(|| match grid.times() {
            [first, second, ..] => second - first,
            [only] => *only,
            [] => 0.0,
        })
    }

    fn train_step(
        &mut self,
        batch: &Batch,
        grid: &TimeGrid,
        horizon: usize,
        epoch: usize,
        index: usize,
        pass: Pass,
    ) -> Result<(f64, Option<GradientRecord>)> {
        let tape = Tape::new();
        let ctx = ExecutionContext::training();
        let x0 = tape.constant(batch.initial_states());
        let predicted = self.model.rollout(&x0, grid, self.step_size(grid), &ctx)?;
        let loss = self
            .loss
            .compute(&predicted, batch.window(horizon)?, self.train_denominator.as_ref())?;
        let value = loss.item();
        if !value.is_finite() {
            return Err(Error::NonFinite {
                quantity: "training loss",
                epoch,
                value,
            });
        }

        let mut grads = tape.param_grads(&loss)?;
        let preclip = self.config.collect_grads.then(|| self.parameter_norms(&grads));
        if let Some(max) = self.config.grad_clip {
            let norm = grads.clip_global_norm(max);
            debug!(epoch, batch = index, ?pass, norm, "gradient norm");
        }
        let record = preclip.map(|(parameters, preclip)| GradientRecord {
            epoch,
            batch: index,
            pass,
            postclip: self.parameter_norms(&grads).1,
            parameters,
            preclip,
        });

        self.optimizer.step(&mut self.model, &grads);
        self.steps += 1;
        if let (Some(decay), Some(schedule)) = (self.config.lr_decay, self.lr_schedule.as_mut()) {
            if epoch > decay.begin_decay {
                schedule.step(&mut self.optimizer);
            }
        }
        Ok((value, record))
    }

    fn parameter_norms(&self, grads: &Gradients) -> (Vec<String>, Vec<f64>) {
        let mut names = Vec::new();
        let mut norms = Vec::new();
        self.model.visit_parameters(&mut |p| {
            if let Some(g) = grads.get(p.id()) {
                names.push(p.name().to_string());
                norms.push(g.iter().map(|v| v * v).sum::<f64>().sqrt());
            }
        });
        (names, norms)
    }

    /// Summed held-out loss without gradient tracking.
    fn evaluate(&mut self, loader: &mut DataLoader, horizon: usize, epoch: usize) -> Result<f64> {
        let ctx = ExecutionContext::inference();
        let mut total = 0.0;
        for batch in loader.epoch() {
            let grid = batch.validate()?.truncated(horizon)?;
            let window = batch.window(horizon)?;
            if self.loss.rescales() && self.test_denominator.as_ref().map(|(h, _)| *h) != Some(horizon) {
                self.test_denominator = Some((horizon, minmax_denominator(window)));
            }
            let tape = Tape::new();
            let x0 = tape.constant(batch.initial_states());
            let predicted = self.model.rollout(&x0, &grid, self.step_size(&grid), &ctx)?;
            let denominator = self.test_denominator.as_ref().map(|(_, d)| d);
            total += self.loss.compute(&predicted, window, denominator)?.item();
        }
        if !total.is_finite() {
            return Err(Error::NonFinite {
                quantity: "test loss",
                epoch,
                value: total,
            });
        }
        Ok(total)
    }
}
