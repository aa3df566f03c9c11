//! Dense layers and multilayer perceptrons on the autodiff tape.

use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::parameter::{ParamId, Parameter};
use crate::autodiff::Var;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};

/// Parameter container shared by every trainable component.
pub trait Module {
    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter));

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter));

    fn num_parameters(&self) -> usize {
        let mut total = 0;
        self.visit_parameters(&mut |p| total += p.len());
        total
    }

    fn set_trainable(&mut self, trainable: bool) {
        self.visit_parameters_mut(&mut |p| p.set_trainable(trainable));
    }

    /// Copies of every parameter value keyed by identity.
    fn snapshot(&self) -> Vec<(ParamId, Array2<f64>)> {
        let mut out = Vec::new();
        self.visit_parameters(&mut |p| out.push((p.id(), p.value().clone())));
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    #[serde(rename = "tanh")]
    Tanh,
    /// `x + sin(x)^2`
    #[serde(rename = "x+sin(x)^2")]
    SinSquared,
}

impl Activation {
    pub fn apply(&self, x: &Var) -> Var {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::SinSquared => x + &x.sin().square(),
        }
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tanh" => Ok(Activation::Tanh),
            "x+sin(x)^2" | "sin_squared" => Ok(Activation::SinSquared),
            other => Err(Error::UnknownActivation(other.to_string())),
        }
    }
}

/// Affine map `x W + b` with `W: [in, out]`, `b: [1, out]`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Parameter,
    bias: Parameter,
}

impl Linear {
    /// Uniform initialisation in `±1/sqrt(fan_in)` for weight and bias.
    pub fn new<R: Rng + ?Sized>(
        name: &str,
        input_dim: usize,
        output_dim: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if input_dim == 0 || output_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "linear layer '{name}' needs non-zero dimensions ({input_dim} -> {output_dim})"
            )));
        }
        let bound = 1.0 / (input_dim as f64).sqrt();
        let uniform =
            Uniform::new(-bound, bound).map_err(|e| Error::Distribution(e.to_string()))?;
        let weight = Array2::from_shape_fn((input_dim, output_dim), |_| uniform.sample(rng));
        let bias = Array2::from_shape_fn((1, output_dim), |_| uniform.sample(rng));
        Ok(Self {
            weight: Parameter::new(format!("{name}::weight"), weight),
            bias: Parameter::new(format!("{name}::bias"), bias),
        })
    }

    pub fn input_dim(&self) -> usize {
        self.weight.value().nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.value().ncols()
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn bias(&self) -> &Parameter {
        &self.bias
    }

    /// Sets weight and bias to zero, making the layer output identically zero.
    pub fn zero(&mut self) {
        self.weight.value_mut().fill(0.0);
        self.bias.value_mut().fill(0.0);
    }

    pub fn forward(&self, x: &Var, ctx: &ExecutionContext) -> Result<Var> {
        let (batch, cols) = x.shape();
        if cols != self.input_dim() {
            return Err(Error::ShapeMismatch {
                context: "linear input",
                expected: vec![batch, self.input_dim()],
                found: vec![batch, cols],
            });
        }
        let tape = x.tape();
        let w = tape.param(&self.weight, ctx.track_grad);
        let b = tape.param(&self.bias, ctx.track_grad);
        Ok(&x.matmul(&w) + &b.broadcast_rows(batch))
    }
}

impl Module for Linear {
    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        visitor(&self.weight);
        visitor(&self.bias);
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        visitor(&mut self.weight);
        visitor(&mut self.bias);
    }
}

/// Shape of an MLP, shared by blocks created at different times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MlpSpec {
    pub input_dim: usize,
    pub hidden_dim: usize,
    /// Number of hidden layers (at least one)
    pub hidden_layers: usize,
    pub output_dim: usize,
    pub activation: Activation,
}

/// `hidden_layers` activated layers followed by a linear read-out.
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<Linear>,
    activation: Activation,
}

impl Mlp {
    pub fn new<R: Rng + ?Sized>(name: &str, spec: &MlpSpec, rng: &mut R) -> Result<Self> {
        if spec.hidden_layers == 0 {
            return Err(Error::InvalidConfig(format!(
                "mlp '{name}' needs at least one hidden layer"
            )));
        }
        let mut layers = Vec::with_capacity(spec.hidden_layers + 1);
        layers.push(Linear::new(
            &format!("{name}.0"),
            spec.input_dim,
            spec.hidden_dim,
            rng,
        )?);
        for l in 1..spec.hidden_layers {
            layers.push(Linear::new(
                &format!("{name}.{l}"),
                spec.hidden_dim,
                spec.hidden_dim,
                rng,
            )?);
        }
        layers.push(Linear::new(
            &format!("{name}.{}", spec.hidden_layers),
            spec.hidden_dim,
            spec.output_dim,
            rng,
        )?);
        Ok(Self {
            layers,
            activation: spec.activation,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].input_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].output_dim()
    }

    /// Zeroes the read-out layer; the MLP then outputs zero for any input.
    pub fn zero_output(&mut self) {
        if let Some(last) = self.layers.last_mut() {
            last.zero();
        }
    }

    pub fn forward(&self, x: &Var, ctx: &ExecutionContext) -> Result<Var> {
        let last = self.layers.len() - 1;
        let mut h = x.clone();
        for (l, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h, ctx)?;
            if l < last {
                h = self.activation.apply(&h);
            }
        }
        Ok(h)
    }
}

impl Module for Mlp {
    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        for layer in &self.layers {
            layer.visit_parameters(visitor);
        }
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        for layer in &mut self.layers {
            layer.visit_parameters_mut(visitor);
        }
    }
}
