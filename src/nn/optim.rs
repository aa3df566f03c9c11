//! Optimizer: AdamW with Identity-Keyed State
//!
//! Moment buffers live in a map from [`ParamId`] to per-parameter state and
//! are created lazily on the first update a parameter receives. A model that
//! grows mid-training therefore needs no re-registration: new parameters get
//! fresh buffers, existing ones keep theirs.
//!
//! Update for parameter θ with gradient g at its step t:
//!
//! ```text
//! θ ← θ (1 − lr·λ)
//! m ← β₁ m + (1 − β₁) g
//! v ← β₂ v + (1 − β₂) g²
//! θ ← θ − lr · m̂ / (√v̂ + ε),   m̂ = m/(1−β₁ᵗ), v̂ = v/(1−β₂ᵗ)
//! ```

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::layers::Module;
use super::parameter::{Gradients, ParamId};

/// AdamW hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamWConfig {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 1e-4,
        }
    }
}

/// First and second moment estimates for one parameter
#[derive(Debug, Clone)]
pub struct Moments {
    pub m: Array2<f64>,
    pub v: Array2<f64>,
    pub step: u64,
}

#[derive(Debug, Clone)]
pub struct AdamW {
    config: AdamWConfig,
    /// Multiplier applied to `config.lr`, driven by the LR schedule
    lr_factor: f64,
    state: HashMap<ParamId, Moments>,
}

impl AdamW {
    pub fn new(config: AdamWConfig) -> Self {
        Self {
            config,
            lr_factor: 1.0,
            state: HashMap::new(),
        }
    }

    pub fn config(&self) -> &AdamWConfig {
        &self.config
    }

    /// Learning rate currently in effect
    pub fn lr(&self) -> f64 {
        self.config.lr * self.lr_factor
    }

    pub fn set_lr_factor(&mut self, factor: f64) {
        self.lr_factor = factor;
    }

    pub fn moments(&self, id: ParamId) -> Option<&Moments> {
        self.state.get(&id)
    }

    /// Number of parameters with optimizer state
    pub fn tracked(&self) -> usize {
        self.state.len()
    }

    /// Updates every trainable parameter of `model` that has a gradient.
    pub fn step(&mut self, model: &mut dyn Module, grads: &Gradients) {
        let lr = self.lr();
        let AdamWConfig {
            beta1,
            beta2,
            eps,
            weight_decay,
            ..
        } = self.config;
        let state = &mut self.state;

        model.visit_parameters_mut(&mut |param| {
            if !param.is_trainable() {
                return;
            }
            let id = param.id();
            let Some(grad) = grads.get(id) else {
                return;
            };
            let value = param.value_mut();
            let moments = state.entry(id).or_insert_with(|| Moments {
                m: Array2::zeros(value.raw_dim()),
                v: Array2::zeros(value.raw_dim()),
                step: 0,
            });
            moments.step += 1;
            let t = moments.step as i32;
            let bias1 = 1.0 - beta1.powi(t);
            let bias2 = 1.0 - beta2.powi(t);

            value.mapv_inplace(|w| w * (1.0 - lr * weight_decay));
            moments
                .m
                .zip_mut_with(grad, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
            moments
                .v
                .zip_mut_with(grad, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);
            ndarray::Zip::from(value)
                .and(&moments.m)
                .and(&moments.v)
                .for_each(|w, &m, &v| {
                    *w -= lr * (m / bias1) / ((v / bias2).sqrt() + eps);
                });
        });
    }
}

/// Linear learning-rate factor from `start` to `end` over `total_iters` steps,
/// held at `end` afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearLr {
    pub start: f64,
    pub end: f64,
    pub total_iters: usize,
    #[serde(skip)]
    current: usize,
}

impl LinearLr {
    pub fn new(start: f64, end: f64, total_iters: usize) -> Self {
        Self {
            start,
            end,
            total_iters,
            current: 0,
        }
    }

    pub fn factor(&self) -> f64 {
        if self.total_iters == 0 {
            return self.end;
        }
        let progress = self.current.min(self.total_iters) as f64 / self.total_iters as f64;
        self.start + (self.end - self.start) * progress
    }

    /// Advances one iteration and applies the new factor to `optimizer`.
    pub fn step(&mut self, optimizer: &mut AdamW) {
        self.current += 1;
        optimizer.set_lr_factor(self.factor());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Linear, Parameter};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Pair {
        a: Parameter,
        b: Option<Parameter>,
    }

    impl Module for Pair {
        fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
            visitor(&self.a);
            if let Some(b) = &self.b {
                visitor(b);
            }
        }

        fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
            visitor(&mut self.a);
            if let Some(b) = &mut self.b {
                visitor(b);
            }
        }
    }

    #[test]
    fn test_first_step_moves_by_lr() {
        // with bias correction the first Adam step has magnitude ~lr
        let mut model = Pair {
            a: Parameter::new("a", array![[1.0, -1.0]]),
            b: None,
        };
        let mut grads = Gradients::new();
        grads.insert(model.a.id(), array![[0.5, -2.0]]);
        let mut opt = AdamW::new(AdamWConfig {
            weight_decay: 0.0,
            ..AdamWConfig::default()
        });
        opt.step(&mut model, &grads);
        assert_abs_diff_eq!(model.a.value()[[0, 0]], 1.0 - 1e-3, epsilon = 1e-9);
        assert_abs_diff_eq!(model.a.value()[[0, 1]], -1.0 + 1e-3, epsilon = 1e-9);
    }

    #[test]
    fn test_new_parameter_leaves_existing_state_untouched() {
        let mut model = Pair {
            a: Parameter::new("a", array![[1.0]]),
            b: None,
        };
        let mut opt = AdamW::new(AdamWConfig::default());
        let mut grads = Gradients::new();
        grads.insert(model.a.id(), array![[0.3]]);
        opt.step(&mut model, &grads);
        let before = opt.moments(model.a.id()).unwrap().clone();

        model.b = Some(Parameter::new("b", array![[2.0]]));
        let mut only_b = Gradients::new();
        only_b.insert(model.b.as_ref().unwrap().id(), array![[1.0]]);
        opt.step(&mut model, &only_b);

        let after = opt.moments(model.a.id()).unwrap();
        assert_eq!(after.m, before.m);
        assert_eq!(after.v, before.v);
        assert_eq!(after.step, 1);
        assert_eq!(opt.tracked(), 2);
    }

    #[test]
    fn test_frozen_parameters_are_skipped() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut layer = Linear::new("fc", 2, 2, &mut rng).unwrap();
        layer.set_trainable(false);
        let before = layer.snapshot();
        let mut grads = Gradients::new();
        grads.insert(layer.weight().id(), Array2::ones((2, 2)));
        let mut opt = AdamW::new(AdamWConfig::default());
        opt.step(&mut layer, &grads);
        assert_eq!(layer.snapshot(), before);
        assert_eq!(opt.tracked(), 0);
    }

    #[test]
    fn test_linear_lr_reaches_end_and_holds() {
        let mut opt = AdamW::new(AdamWConfig::default());
        let mut sched = LinearLr::new(1.0, 0.5, 4);
        sched.step(&mut opt);
        assert_abs_diff_eq!(opt.lr(), 1e-3 * 0.875, epsilon = 1e-15);
        for _ in 0..10 {
            sched.step(&mut opt);
        }
        assert_abs_diff_eq!(opt.lr(), 1e-3 * 0.5, epsilon = 1e-15);
    }
}
