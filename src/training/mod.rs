//! Training: horizon curriculum, capacity growth, losses and the epoch loop.

mod curriculum;
mod growth;
mod loss;
mod trainer;

pub use curriculum::{CurriculumScheduler, HorizonPolicy, HorizonSchedule};
pub use growth::{GrowthConfig, GrowthStrategy};
pub use loss::{minmax_denominator, LossKind, TrajectoryLoss};
pub use trainer::{
    GradientRecord, GrowthRecord, LrDecayConfig, Pass, Trainer, TrainingConfig, TrainingLogs,
};
