//! Trajectory losses over a rollout horizon.

use ndarray::{Array1, Array2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::autodiff::Var;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    /// Mean squared error over every element
    #[default]
    #[serde(alias = "L2")]
    L2,
    /// Per-coordinate mean squared error, weighted and summed
    #[serde(alias = "L2weighted")]
    L2Weighted,
}

impl FromStr for LossKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "L2" | "l2" => Ok(LossKind::L2),
            "L2weighted" | "l2_weighted" => Ok(LossKind::L2Weighted),
            other => Err(Error::UnknownLossKind(other.to_string())),
        }
    }
}

/// Per-coordinate `max - min` over batch and time; flat coordinates map to 1.
pub fn minmax_denominator(window: ArrayView3<'_, f64>) -> Array1<f64> {
    let coord_dim = window.len_of(Axis(2));
    Array1::from_shape_fn(coord_dim, |c| {
        let lane = window.index_axis(Axis(2), c);
        let (lo, hi) = lane
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = hi - lo;
        if range > 0.0 && range.is_finite() {
            range
        } else {
            1.0
        }
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryLoss {
    kind: LossKind,
    weights: Option<Vec<f64>>,
    rescale: bool,
}

impl TrajectoryLoss {
    pub fn new(kind: LossKind, weights: Option<Vec<f64>>, rescale: bool) -> Self {
        Self { kind, weights, rescale }
    }

    pub fn kind(&self) -> LossKind {
        self.kind
    }

    pub fn rescales(&self) -> bool {
        self.rescale
    }

    /// Loss of `predicted` (one `[batch, coord]` var per time step) against
    /// `target` `[batch, horizon, coord]`.
    ///
    /// `denominator` is required when rescaling is on.
    pub fn compute(
        &self,
        predicted: &[Var],
        target: ArrayView3<'_, f64>,
        denominator: Option<&Array1<f64>>,
    ) -> Result<Var> {
        let (batch, horizon, coord_dim) = target.dim();
        if predicted.len() != horizon {
            return Err(Error::ShapeMismatch {
                context: "loss horizon",
                expected: vec![horizon],
                found: vec![predicted.len()],
            });
        }
        let first = predicted.first().ok_or(Error::HorizonTooLong { horizon: 0, length: 0 })?;
        if first.shape() != (batch, coord_dim) {
            return Err(Error::ShapeMismatch {
                context: "loss prediction",
                expected: vec![batch, coord_dim],
                found: vec![first.shape().0, first.shape().1],
            });
        }
        let tape = first.tape();

        let scale = match (self.rescale, denominator) {
            (false, _) => None,
            (true, Some(d)) if d.len() == coord_dim => {
                let inverse = d.mapv(|v| 1.0 / v).insert_axis(Axis(0));
                Some(tape.constant(inverse).broadcast_rows(batch))
            }
            (true, Some(d)) => {
                return Err(Error::ShapeMismatch {
                    context: "loss denominator",
                    expected: vec![coord_dim],
                    found: vec![d.len()],
                })
            }
            (true, None) => return Err(Error::InvalidConfig("rescaled loss without a denominator".into())),
        };

        // Σ_t Σ_b (pred - target)^2, kept per coordinate
        let mut per_coord = tape.zeros((1, coord_dim));
        for (k, pred) in predicted.iter().enumerate() {
            let truth = tape.constant(target.index_axis(Axis(1), k).to_owned());
            let mut diff = pred - &truth;
            if let Some(scale) = &scale {
                diff = &diff * scale;
            }
            per_coord = &per_coord + &diff.square().sum_rows();
        }

        let count = (batch * horizon) as f64;
        let loss = match self.kind {
            LossKind::L2 => &per_coord.sum_all() * (1.0 / (count * coord_dim as f64)),
            LossKind::L2Weighted => {
                let weights = match &self.weights {
                    Some(w) if w.len() == coord_dim => Array2::from_shape_vec((1, coord_dim), w.clone())
                        .map_err(|e| Error::InvalidConfig(e.to_string()))?,
                    Some(w) => {
                        return Err(Error::ShapeMismatch {
                            context: "loss weights",
                            expected: vec![coord_dim],
                            found: vec![w.len()],
                        })
                    }
                    None => Array2::ones((1, coord_dim)),
                };
                let weighted = &per_coord * &tape.constant(weights);
                &weighted.sum_all() * (1.0 / count)
            }
        };
        tape.check()?;
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Tape;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array3};

    fn target() -> Array3<f64> {
        Array3::from_shape_fn((2, 3, 2), |(b, t, c)| (b as f64) - 0.5 * t as f64 + 2.0 * c as f64)
    }

    fn as_vars(tape: &std::rc::Rc<Tape>, states: &Array3<f64>) -> Vec<Var> {
        states
            .axis_iter(Axis(1))
            .map(|s| tape.constant(s.to_owned()))
            .collect()
    }

    #[test]
    fn test_identical_sequences_have_zero_loss() {
        let target = target();
        let denom = minmax_denominator(target.view());
        for kind in [LossKind::L2, LossKind::L2Weighted] {
            for rescale in [false, true] {
                let tape = Tape::new();
                let loss = TrajectoryLoss::new(kind, Some(vec![0.3, 2.0]), rescale);
                let value = loss
                    .compute(&as_vars(&tape, &target), target.view(), Some(&denom))
                    .unwrap()
                    .item();
                assert_eq!(value, 0.0);
            }
        }
    }

    #[test]
    fn test_l2_is_elementwise_mean() {
        let target = target();
        let shifted = target.mapv(|v| v + 2.0);
        let tape = Tape::new();
        let loss = TrajectoryLoss::new(LossKind::L2, None, false)
            .compute(&as_vars(&tape, &shifted), target.view(), None)
            .unwrap();
        assert_abs_diff_eq!(loss.item(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_weighted_sums_per_coordinate_means() {
        let target = target();
        let mut shifted = target.clone();
        shifted.index_axis_mut(Axis(2), 1).mapv_inplace(|v| v + 1.0);
        let tape = Tape::new();
        let loss = TrajectoryLoss::new(LossKind::L2Weighted, Some(vec![5.0, 3.0]), false)
            .compute(&as_vars(&tape, &shifted), target.view(), None)
            .unwrap();
        assert_abs_diff_eq!(loss.item(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rescaling_divides_by_range() {
        let target = target();
        let denom = minmax_denominator(target.view());
        // coordinate ranges: batch spans 1, time spans 1
        assert_eq!(denom, array![2.0, 2.0]);
        let shifted = target.mapv(|v| v + 2.0);
        let tape = Tape::new();
        let loss = TrajectoryLoss::new(LossKind::L2, None, true)
            .compute(&as_vars(&tape, &shifted), target.view(), Some(&denom))
            .unwrap();
        assert_abs_diff_eq!(loss.item(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_flat_coordinate_denominator_is_one() {
        let flat = Array3::from_elem((2, 2, 1), 3.0);
        assert_eq!(minmax_denominator(flat.view()), array![1.0]);
    }

    #[test]
    fn test_parse() {
        assert_eq!("L2".parse::<LossKind>().unwrap(), LossKind::L2);
        assert_eq!("l2_weighted".parse::<LossKind>().unwrap(), LossKind::L2Weighted);
        assert!(matches!("huber".parse::<LossKind>(), Err(Error::UnknownLossKind(_))));
    }

    #[test]
    fn test_loss_is_differentiable() {
        let target = target();
        let tape = Tape::new();
        let x = tape.leaf(target.index_axis(Axis(1), 0).to_owned());
        let mut predicted = vec![x.clone()];
        predicted.extend(as_vars(&tape, &target).into_iter().skip(1));
        let shifted_target = target.mapv(|v| v - 1.0);
        let loss = TrajectoryLoss::new(LossKind::L2, None, false)
            .compute(&predicted, shifted_target.view(), None)
            .unwrap();
        let g = tape.grad(&loss, &[x]).unwrap();
        // d/dx mean((x - t)^2) with x - t = 1 over 12 elements
        for v in g[0].to_array().iter() {
            assert_abs_diff_eq!(*v, 2.0 / 12.0, epsilon = 1e-12);
        }
    }
}
