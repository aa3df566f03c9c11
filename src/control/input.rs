//! Input Functions: Scalar Forcing Signals u(t)

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Scalar input signal, shared by every trajectory in a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputFunction {
    /// u(t) = 0
    #[default]
    Zero,
    /// u(t) = A for t ≥ t0, 0 before
    Step { amplitude: f64, t0: f64 },
    /// u(t) = A sin(2π f t + φ)
    Sine {
        amplitude: f64,
        frequency: f64,
        #[serde(default)]
        phase: f64,
    },
    /// Linear chirp sweeping f0 → f1 over `duration`, then holding f1
    Chirp {
        amplitude: f64,
        f0: f64,
        f1: f64,
        duration: f64,
    },
    /// u(t) = A/n Σ sin(2π fᵢ t)
    #[serde(rename = "multisine")]
    MultiSine { amplitude: f64, frequencies: Vec<f64> },
}

impl InputFunction {
    pub fn value(&self, t: f64) -> f64 {
        match self {
            InputFunction::Zero => 0.0,
            InputFunction::Step { amplitude, t0 } => {
                if t >= *t0 {
                    *amplitude
                } else {
                    0.0
                }
            }
            InputFunction::Sine {
                amplitude,
                frequency,
                phase,
            } => amplitude * (2.0 * PI * frequency * t + phase).sin(),
            InputFunction::Chirp {
                amplitude,
                f0,
                f1,
                duration,
            } => {
                let rate = if *duration > 0.0 {
                    (f1 - f0) / duration
                } else {
                    0.0
                };
                let phase = if t <= *duration {
                    f0 * t + 0.5 * rate * t * t
                } else {
                    f0 * duration + 0.5 * rate * duration * duration + f1 * (t - duration)
                };
                amplitude * (2.0 * PI * phase).sin()
            }
            InputFunction::MultiSine {
                amplitude,
                frequencies,
            } => {
                if frequencies.is_empty() {
                    return 0.0;
                }
                let sum: f64 = frequencies.iter().map(|f| (2.0 * PI * f * t).sin()).sum();
                amplitude * sum / frequencies.len() as f64
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, InputFunction::Zero)
    }
}

/// Resolves a bare tag with unit amplitude and default shape parameters.
impl FromStr for InputFunction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "zero" => Ok(InputFunction::Zero),
            "step" => Ok(InputFunction::Step {
                amplitude: 1.0,
                t0: 0.0,
            }),
            "sine" => Ok(InputFunction::Sine {
                amplitude: 1.0,
                frequency: 1.0,
                phase: 0.0,
            }),
            "chirp" => Ok(InputFunction::Chirp {
                amplitude: 1.0,
                f0: 0.1,
                f1: 2.0,
                duration: 10.0,
            }),
            "multisine" => Ok(InputFunction::MultiSine {
                amplitude: 1.0,
                frequencies: vec![0.5, 1.0, 2.0],
            }),
            other => Err(Error::UnknownInputFunction(other.to_string())),
        }
    }
}
