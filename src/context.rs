//! Execution context passed explicitly into every core function.
//!
//! Replaces ambient framework switches (`train()`/`eval()`, `no_grad`,
//! implicit device placement) with a small value that callers hand down.

use serde::{Deserialize, Serialize};

/// Where the numeric work runs. Only host memory is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Device holding the arrays
    pub device: Device,
    /// Whether model parameters are recorded as differentiable leaves
    pub track_grad: bool,
}

impl ExecutionContext {
    /// Context for optimisation steps: parameters are differentiable.
    pub fn training() -> Self {
        Self {
            device: Device::Cpu,
            track_grad: true,
        }
    }

    /// Context for inference: parameters enter the tape as constants.
    pub fn inference() -> Self {
        Self {
            device: Device::Cpu,
            track_grad: false,
        }
    }

    /// Narrows gradient tracking: `false` turns it off, `true` keeps the current mode.
    pub fn with_grad(self, enabled: bool) -> Self {
        Self {
            track_grad: self.track_grad && enabled,
            ..self
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::inference()
    }
}
