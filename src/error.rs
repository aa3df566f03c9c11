//! Error taxonomy for the crate.
//!
//! Three families, none of them retried anywhere:
//!
//! - **Configuration**: unknown tags, inconsistent schedules, coordinate
//!   counts that do not match the model. Fatal at configuration time.
//! - **Numerical**: non-finite values reaching the loss. Surfaced so a
//!   diverging run is visibly a diverging run.
//! - **Shape**: collaborator contract violations (batch sizes, time grids,
//!   operand shapes on the autodiff tape).

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("unknown initial-condition policy '{0}'")]
    UnknownInitPolicy(String),
    #[error("unknown input function '{0}'")]
    UnknownInputFunction(String),
    #[error("unknown input matrix '{0}'")]
    UnknownInputMatrix(String),
    #[error("unknown activation '{0}'")]
    UnknownActivation(String),
    #[error("unknown loss type '{0}'")]
    UnknownLossKind(String),
    #[error("unknown growth variant '{0}'")]
    UnknownGrowthVariant(String),
    #[error("gradient has {found} components but the system has {expected} coordinates")]
    CoordinateMismatch { expected: usize, found: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("non-finite {quantity} at epoch {epoch}: {value}")]
    NonFinite {
        quantity: &'static str,
        epoch: usize,
        value: f64,
    },
    #[error("shape mismatch in {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("operands recorded on different tapes")]
    ForeignTape,
    #[error("time grid rows differ within a batch (row {row})")]
    InconsistentTimeGrid { row: usize },
    #[error("time grid must be strictly increasing (index {index})")]
    NonMonotonicTimeGrid { index: usize },
    #[error("horizon {horizon} exceeds trajectory length {length}")]
    HorizonTooLong { horizon: usize, length: usize },
    #[error("sampling distribution: {0}")]
    Distribution(String),
}

impl Error {
    /// True for errors raised while resolving configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::UnknownInitPolicy(_)
                | Error::UnknownInputFunction(_)
                | Error::UnknownInputMatrix(_)
                | Error::UnknownActivation(_)
                | Error::UnknownLossKind(_)
                | Error::UnknownGrowthVariant(_)
                | Error::CoordinateMismatch { .. }
                | Error::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
