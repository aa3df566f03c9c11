//! Input Matrices: How the Scalar Input Enters Each Coordinate
//!
//! The forcing term of the dynamics is `u(t) · G(x)`, where `G` returns either
//! a single row shared by the batch or one row per batch item.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::autodiff::Var;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};

/// Anything that maps coordinates to input gains.
pub trait InputMatrix {
    /// `[1, coord]` or `[batch, coord]`
    fn row(&self, coords: &Var, ctx: &ExecutionContext) -> Result<Var>;
}

/// Input matrix that does not depend on the state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StaticInputMatrix {
    #[default]
    Zero,
    Fixed { row: Vec<f64> },
}

impl StaticInputMatrix {
    /// Unit gain on every momentum coordinate: input acts as a torque.
    pub fn torque(coord_dim: usize) -> Self {
        StaticInputMatrix::Fixed {
            row: (0..coord_dim).map(|i| (i % 2) as f64).collect(),
        }
    }
}

impl InputMatrix for StaticInputMatrix {
    fn row(&self, coords: &Var, _ctx: &ExecutionContext) -> Result<Var> {
        let width = coords.shape().1;
        let tape = coords.tape();
        match self {
            StaticInputMatrix::Zero => Ok(tape.zeros((1, width))),
            StaticInputMatrix::Fixed { row } => {
                if row.len() != width {
                    return Err(Error::ShapeMismatch {
                        context: "input matrix row",
                        expected: vec![1, width],
                        found: vec![1, row.len()],
                    });
                }
                let value = Array2::from_shape_vec((1, width), row.clone()).map_err(|_| {
                    Error::ShapeMismatch {
                        context: "input matrix row",
                        expected: vec![1, width],
                        found: vec![row.len()],
                    }
                })?;
                Ok(tape.constant(value))
            }
        }
    }
}

/// Configured input-matrix choice, resolved into a model component at build time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputMatrixSpec {
    #[default]
    Zero,
    /// A fixed row; `None` means unit gain on the momenta.
    Fixed {
        #[serde(default)]
        row: Option<Vec<f64>>,
    },
    /// Tanh MLP from coordinates to a per-item row.
    Learned {
        #[serde(default = "default_hidden_dim")]
        hidden_dim: usize,
        #[serde(default = "default_hidden_layers")]
        hidden_layers: usize,
    },
}

fn default_hidden_dim() -> usize {
    60
}

fn default_hidden_layers() -> usize {
    2
}

impl InputMatrixSpec {
    /// The analytic counterpart; `None` for the learned variant.
    pub fn as_static(&self, coord_dim: usize) -> Option<StaticInputMatrix> {
        match self {
            InputMatrixSpec::Zero => Some(StaticInputMatrix::Zero),
            InputMatrixSpec::Fixed { row: Some(row) } => Some(StaticInputMatrix::Fixed { row: row.clone() }),
            InputMatrixSpec::Fixed { row: None } => Some(StaticInputMatrix::torque(coord_dim)),
            InputMatrixSpec::Learned { .. } => None,
        }
    }
}

impl FromStr for InputMatrixSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "zero" => Ok(InputMatrixSpec::Zero),
            "fixed" => Ok(InputMatrixSpec::Fixed { row: None }),
            "learned" => Ok(InputMatrixSpec::Learned {
                hidden_dim: default_hidden_dim(),
                hidden_layers: default_hidden_layers(),
            }),
            other => Err(Error::UnknownInputMatrix(other.to_string())),
        }
    }
}
