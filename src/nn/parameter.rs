//! Trainable parameters with stable identity.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique parameter identity. Optimizer state is keyed by it, so
/// parameters added later (capacity growth) never disturb existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamId(u64);

impl ParamId {
    fn fresh() -> Self {
        Self(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A cloned parameter is a new parameter: it copies the value and the
/// trainable flag but draws a fresh [`ParamId`], so a cloned model never
/// shares optimizer state with its source.
#[derive(Debug)]
pub struct Parameter {
    id: ParamId,
    name: String,
    value: Array2<f64>,
    trainable: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Array2<f64>) -> Self {
        Self {
            id: ParamId::fresh(),
            name: name.into(),
            value,
            trainable: true,
        }
    }

    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Array2<f64> {
        &self.value
    }

    /// Only the optimizer writes through this.
    pub fn value_mut(&mut self) -> &mut Array2<f64> {
        &mut self.value
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }
}

impl Clone for Parameter {
    fn clone(&self) -> Self {
        Self {
            id: ParamId::fresh(),
            name: self.name.clone(),
            value: self.value.clone(),
            trainable: self.trainable,
        }
    }
}

/// Parameter gradients produced by one backward pass.
#[derive(Debug, Clone, Default)]
pub struct Gradients {
    grads: HashMap<ParamId, Array2<f64>>,
}

impl Gradients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ParamId, grad: Array2<f64>) {
        self.grads.insert(id, grad);
    }

    pub fn get(&self, id: ParamId) -> Option<&Array2<f64>> {
        self.grads.get(&id)
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    /// Global L2 norm over every gradient.
    pub fn global_norm(&self) -> f64 {
        self.grads
            .values()
            .map(|g| g.iter().map(|v| v * v).sum::<f64>())
            .sum::<f64>()
            .sqrt()
    }

    /// Scales all gradients so the global norm does not exceed `max_norm`.
    /// Returns the norm measured before clipping.
    pub fn clip_global_norm(&mut self, max_norm: f64) -> f64 {
        let total = self.global_norm();
        let coef = max_norm / (total + 1e-6);
        if coef < 1.0 {
            for grad in self.grads.values_mut() {
                grad.mapv_inplace(|v| v * coef);
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_ids_are_unique() {
        let a = Parameter::new("a", array![[1.0]]);
        let b = Parameter::new("b", array![[1.0]]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_clone_draws_fresh_identity() {
        let mut a = Parameter::new("a", array![[1.0, 2.0]]);
        a.set_trainable(false);
        let b = a.clone();
        assert_ne!(a.id(), b.id());
        assert_eq!(b.value(), a.value());
        assert_eq!(b.name(), "a");
        assert!(!b.is_trainable());
    }

    #[test]
    fn test_clip_global_norm() {
        let a = Parameter::new("a", array![[0.0, 0.0]]);
        let mut grads = Gradients::new();
        grads.insert(a.id(), array![[3.0, 4.0]]);

        let before = grads.clip_global_norm(1.0);
        assert_abs_diff_eq!(before, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grads.global_norm(), 1.0, epsilon = 1e-5);

        let untouched = grads.clip_global_norm(10.0);
        assert!(untouched < 10.0);
        assert_abs_diff_eq!(grads.global_norm(), untouched, epsilon = 1e-12);
    }
}
