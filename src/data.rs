//! In-memory trajectory batches for training.
//!
//! A [`Batch`] carries states `[batch, time, coord]` and their time grid
//! replicated per row `[batch, time]`. Only row 0 of the times is used,
//! after [`Batch::validate`] has checked every row matches it.

use ndarray::{s, Array2, Array3, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::dynamics::TimeGrid;
use crate::error::{Error, Result};
use crate::trajectory::Trajectories;

#[derive(Debug, Clone)]
pub struct Batch {
    pub states: Array3<f64>,
    pub times: Array2<f64>,
}

impl Batch {
    pub fn new(states: Array3<f64>, times: Array2<f64>) -> Self {
        Self { states, times }
    }

    pub fn batch_size(&self) -> usize {
        self.states.len_of(Axis(0))
    }

    pub fn time_steps(&self) -> usize {
        self.states.len_of(Axis(1))
    }

    pub fn coord_dim(&self) -> usize {
        self.states.len_of(Axis(2))
    }

    /// Checks the shape contract and returns the shared time grid.
    pub fn validate(&self) -> Result<TimeGrid> {
        let (batch, steps, _) = self.states.dim();
        if self.times.dim() != (batch, steps) {
            return Err(Error::ShapeMismatch {
                context: "batch time grid",
                expected: vec![batch, steps],
                found: self.times.shape().to_vec(),
            });
        }
        if batch == 0 {
            return Err(Error::ShapeMismatch {
                context: "empty batch",
                expected: vec![1, steps],
                found: vec![0, steps],
            });
        }
        let first = self.times.row(0);
        for (row, times) in self.times.rows().into_iter().enumerate().skip(1) {
            if times != first {
                return Err(Error::InconsistentTimeGrid { row });
            }
        }
        TimeGrid::new(first.to_vec())
    }

    /// States at the first time step, `[batch, coord]`.
    pub fn initial_states(&self) -> Array2<f64> {
        self.states.index_axis(Axis(1), 0).to_owned()
    }

    /// The first `horizon` steps of every trajectory.
    pub fn window(&self, horizon: usize) -> Result<ArrayView3<'_, f64>> {
        if horizon == 0 || horizon > self.time_steps() {
            return Err(Error::HorizonTooLong {
                horizon,
                length: self.time_steps(),
            });
        }
        Ok(self.states.slice(s![.., ..horizon, ..]))
    }
}

/// Fixed set of trajectories sharing one time grid.
#[derive(Debug, Clone)]
pub struct TrajectoryDataset {
    states: Array3<f64>,
    times: Array2<f64>,
}

impl TrajectoryDataset {
    pub fn new(states: Array3<f64>, times: Array2<f64>) -> Result<Self> {
        Batch::new(states.clone(), times.clone()).validate()?;
        Ok(Self { states, times })
    }

    pub fn from_trajectories(trajectories: &Trajectories) -> Result<Self> {
        Self::new(trajectories.states.clone(), trajectories.time_matrix())
    }

    pub fn len(&self) -> usize {
        self.states.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn states(&self) -> &Array3<f64> {
        &self.states
    }

    pub fn select(&self, indices: &[usize]) -> Batch {
        Batch {
            states: self.states.select(Axis(0), indices),
            times: self.times.select(Axis(0), indices),
        }
    }

    /// Splits off the first `n_train` trajectories for training.
    pub fn split_at(&self, n_train: usize) -> Result<(Self, Self)> {
        if n_train == 0 || n_train >= self.len() {
            return Err(Error::InvalidConfig(format!(
                "cannot split {} trajectories at {}",
                self.len(),
                n_train
            )));
        }
        let train: Vec<usize> = (0..n_train).collect();
        let test: Vec<usize> = (n_train..self.len()).collect();
        let a = self.select(&train);
        let b = self.select(&test);
        Ok((
            Self {
                states: a.states,
                times: a.times,
            },
            Self {
                states: b.states,
                times: b.times,
            },
        ))
    }
}

/// Mini-batch iteration over a dataset, reshuffled each epoch if requested.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: TrajectoryDataset,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl DataLoader {
    pub fn new(dataset: TrajectoryDataset, batch_size: usize, shuffle: bool, seed: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".into()));
        }
        Ok(Self {
            dataset,
            batch_size,
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn dataset(&self) -> &TrajectoryDataset {
        &self.dataset
    }

    /// Number of batches per epoch.
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Batches for one pass over the data.
    pub fn epoch(&mut self) -> Vec<Batch> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        order
            .chunks(self.batch_size)
            .map(|chunk| self.dataset.select(chunk))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn dataset(n: usize) -> TrajectoryDataset {
        let states = Array3::from_shape_fn((n, 4, 2), |(b, t, c)| (b * 100 + t * 10 + c) as f64);
        let times = Array2::from_shape_fn((n, 4), |(_, t)| 0.1 * (t + 1) as f64);
        TrajectoryDataset::new(states, times).unwrap()
    }

    #[test]
    fn test_validate_rejects_diverging_time_rows() {
        let states = Array3::zeros((2, 3, 2));
        let times = array![[0.1, 0.2, 0.3], [0.1, 0.2, 0.4]];
        let err = Batch::new(states, times).validate().unwrap_err();
        assert!(matches!(err, Error::InconsistentTimeGrid { row: 1 }));
    }

    #[test]
    fn test_validate_rejects_batch_size_mismatch() {
        let states = Array3::zeros((3, 2, 2));
        let times = array![[0.1, 0.2]];
        let err = Batch::new(states, times).validate().unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_window_bounds() {
        let batch = dataset(2).select(&[0, 1]);
        assert_eq!(batch.window(3).unwrap().dim(), (2, 3, 2));
        assert!(matches!(
            batch.window(5),
            Err(Error::HorizonTooLong { horizon: 5, length: 4 })
        ));
    }

    #[test]
    fn test_loader_covers_every_trajectory_once() {
        let mut loader = DataLoader::new(dataset(7), 3, true, 11).unwrap();
        assert_eq!(loader.len(), 3);
        let batches = loader.epoch();
        let mut seen: Vec<usize> = batches
            .iter()
            .flat_map(|b| b.states.index_axis(Axis(1), 0).column(0).to_vec())
            .map(|v| v as usize / 100)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
        assert_eq!(batches.last().unwrap().batch_size(), 1);
    }

    #[test]
    fn test_split_at() {
        let (train, test) = dataset(5).split_at(4).unwrap();
        assert_eq!(train.len(), 4);
        assert_eq!(test.len(), 1);
        assert_eq!(test.states()[[0, 0, 0]], 400.0);
    }
}
