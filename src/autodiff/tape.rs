//! Tape: Append-Only Operation Record with Higher-Order Gradients
//!
//! Every operation on a [`Var`] appends a node holding its value and the
//! indices of its inputs. Because inputs always precede outputs, node order
//! is a topological order and reverse sweeps need no sorting.
//!
//! Gradients are built from the same operations, so a gradient is itself a
//! `Var` on the tape and can be differentiated again. This is what training
//! needs: the learned vector field is `J ∇H_θ(x)`, and the loss gradient with
//! respect to θ passes through `∇H_θ`.
//!
//! Shape and tape-identity violations do not panic. The first one is
//! recorded on the tape, the offending node gets a zero placeholder value,
//! and [`Tape::check`], [`Tape::grad`] and [`Tape::param_grads`] report it as
//! an [`Error`].
//!
//! A tape lives for one gradient region (one mini-batch, or one derivative
//! evaluation on plain data) and is dropped afterwards. Values are read back
//! with [`Var::to_array`], which copies them out and keeps no reference to the
//! tape.

use ndarray::{s, Array2, Axis};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::nn::{Gradients, ParamId, Parameter};

#[derive(Debug, Clone)]
enum Op {
    Leaf,
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Div(usize, usize),
    Neg(usize),
    Scale(usize, f64),
    AddScalar(usize, f64),
    MatMul(usize, usize),
    Transpose(usize),
    Tanh(usize),
    Sin(usize),
    Cos(usize),
    Square(usize),
    SumAll(usize),
    SumRows(usize),
    SumCols(usize),
    BroadcastRows(usize),
    BroadcastCols(usize),
    BroadcastScalar(usize),
    SliceCols { src: usize, start: usize },
    PadCols { src: usize, start: usize },
    ConcatCols(Vec<usize>),
}

impl Op {
    fn parents(&self) -> Vec<usize> {
        match self {
            Op::Leaf => Vec::new(),
            Op::Add(a, b) | Op::Sub(a, b) | Op::Mul(a, b) | Op::Div(a, b) | Op::MatMul(a, b) => {
                vec![*a, *b]
            }
            Op::Neg(a)
            | Op::Scale(a, _)
            | Op::AddScalar(a, _)
            | Op::Transpose(a)
            | Op::Tanh(a)
            | Op::Sin(a)
            | Op::Cos(a)
            | Op::Square(a)
            | Op::SumAll(a)
            | Op::SumRows(a)
            | Op::SumCols(a)
            | Op::BroadcastRows(a)
            | Op::BroadcastCols(a)
            | Op::BroadcastScalar(a) => vec![*a],
            Op::SliceCols { src, .. } | Op::PadCols { src, .. } => vec![*src],
            Op::ConcatCols(parts) => parts.clone(),
        }
    }
}

struct Node {
    value: Rc<Array2<f64>>,
    op: Op,
}

/// Registered model parameter: tape index plus whether it is differentiated.
#[derive(Debug, Clone, Copy)]
struct ParamSlot {
    index: usize,
    trainable: bool,
}

/// Operation record for one gradient region.
pub struct Tape {
    nodes: RefCell<Vec<Node>>,
    params: RefCell<HashMap<ParamId, ParamSlot>>,
    /// First contract violation recorded on this tape
    fault: RefCell<Option<Error>>,
}

impl fmt::Debug for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tape(nodes={}, params={})",
            self.nodes.borrow().len(),
            self.params.borrow().len()
        )
    }
}

impl Tape {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            nodes: RefCell::new(Vec::new()),
            params: RefCell::new(HashMap::new()),
            fault: RefCell::new(None),
        })
    }

    /// Fails with the first shape or tape-identity violation recorded so far.
    pub fn check(&self) -> Result<()> {
        match self.fault.borrow().as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Records `err` (unless an earlier fault exists) and returns a zero
    /// placeholder of `shape` that no gradient flows through.
    fn record_fault(self: &Rc<Self>, err: Error, shape: (usize, usize)) -> Var {
        {
            let mut fault = self.fault.borrow_mut();
            if fault.is_none() {
                *fault = Some(err);
            }
        }
        self.push(Array2::zeros(shape), Op::Leaf)
    }

    fn mismatch(
        self: &Rc<Self>,
        context: &'static str,
        expected: &[usize],
        found: &[usize],
        shape: (usize, usize),
    ) -> Var {
        self.record_fault(
            Error::ShapeMismatch {
                context,
                expected: expected.to_vec(),
                found: found.to_vec(),
            },
            shape,
        )
    }

    /// Number of recorded nodes.
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    fn push(self: &Rc<Self>, value: Array2<f64>, op: Op) -> Var {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(Node {
            value: Rc::new(value),
            op,
        });
        Var {
            tape: Rc::clone(self),
            index: nodes.len() - 1,
        }
    }

    fn var(self: &Rc<Self>, index: usize) -> Var {
        Var {
            tape: Rc::clone(self),
            index,
        }
    }

    fn value_of(&self, index: usize) -> Rc<Array2<f64>> {
        Rc::clone(&self.nodes.borrow()[index].value)
    }

    /// Records an input value that gradients may be taken against.
    pub fn leaf(self: &Rc<Self>, value: Array2<f64>) -> Var {
        self.push(value, Op::Leaf)
    }

    /// Records a value that is never differentiated against (data, weights).
    pub fn constant(self: &Rc<Self>, value: Array2<f64>) -> Var {
        self.push(value, Op::Leaf)
    }

    pub fn scalar(self: &Rc<Self>, value: f64) -> Var {
        self.constant(Array2::from_elem((1, 1), value))
    }

    pub fn zeros(self: &Rc<Self>, shape: (usize, usize)) -> Var {
        self.constant(Array2::zeros(shape))
    }

    /// Lifts a model parameter onto the tape, once per tape.
    ///
    /// `trainable` decides whether [`Tape::param_grads`] reports a gradient
    /// for it; the value enters the graph either way.
    pub fn param(self: &Rc<Self>, parameter: &Parameter, trainable: bool) -> Var {
        if let Some(slot) = self.params.borrow().get(&parameter.id()) {
            return self.var(slot.index);
        }
        let var = self.leaf(parameter.value().clone());
        self.params.borrow_mut().insert(
            parameter.id(),
            ParamSlot {
                index: var.index,
                trainable: trainable && parameter.is_trainable(),
            },
        );
        var
    }

    /// Reverse-mode gradient of `output` (summed over its elements) with
    /// respect to each of `wrt`.
    ///
    /// The returned vars are recorded on this tape and remain differentiable.
    /// A target that `output` does not depend on gets a zero gradient.
    pub fn grad(self: &Rc<Self>, output: &Var, wrt: &[Var]) -> Result<Vec<Var>> {
        self.check()?;
        if wrt.iter().chain(std::iter::once(output)).any(|v| !Rc::ptr_eq(self, &v.tape)) {
            return Err(Error::ForeignTape);
        }
        let root = output.index;
        let targets: HashSet<usize> = wrt.iter().map(|v| v.index).collect();
        let Some(lo) = targets.iter().copied().filter(|&t| t <= root).min() else {
            return Ok(wrt.iter().map(|v| self.zeros(v.shape())).collect());
        };

        let reaches = {
            let nodes = self.nodes.borrow();
            let mut reaches = vec![false; root - lo + 1];
            for i in lo..=root {
                reaches[i - lo] = targets.contains(&i)
                    || nodes[i]
                        .op
                        .parents()
                        .iter()
                        .any(|&p| p >= lo && reaches[p - lo]);
            }
            reaches
        };

        let mut adjoints: HashMap<usize, Var> = HashMap::new();
        adjoints.insert(root, self.constant(Array2::ones(output.shape())));
        let mut found: HashMap<usize, Var> = HashMap::new();

        for i in (lo..=root).rev() {
            if !reaches[i - lo] {
                continue;
            }
            let Some(g) = adjoints.remove(&i) else {
                continue;
            };
            if targets.contains(&i) {
                found.insert(i, g.clone());
            }
            let op = self.nodes.borrow()[i].op.clone();
            let out = self.var(i);
            for (parent, contribution) in self.backward_rule(&op, &g, &out) {
                if parent < lo || !reaches[parent - lo] {
                    continue;
                }
                let summed = match adjoints.remove(&parent) {
                    Some(existing) => &existing + &contribution,
                    None => contribution,
                };
                adjoints.insert(parent, summed);
            }
        }

        self.check()?;
        Ok(wrt
            .iter()
            .map(|v| {
                found
                    .get(&v.index)
                    .cloned()
                    .unwrap_or_else(|| self.zeros(v.shape()))
            })
            .collect())
    }

    fn backward_rule(self: &Rc<Self>, op: &Op, g: &Var, out: &Var) -> Vec<(usize, Var)> {
        match op {
            Op::Leaf => Vec::new(),
            Op::Add(a, b) => vec![(*a, g.clone()), (*b, g.clone())],
            Op::Sub(a, b) => vec![(*a, g.clone()), (*b, -g)],
            Op::Mul(a, b) => {
                let (va, vb) = (self.var(*a), self.var(*b));
                vec![(*a, g * &vb), (*b, g * &va)]
            }
            Op::Div(a, b) => {
                let vb = self.var(*b);
                let db = -&(&(g * out) / &vb);
                vec![(*a, g / &vb), (*b, db)]
            }
            Op::Neg(a) => vec![(*a, -g)],
            Op::Scale(a, c) => vec![(*a, g * *c)],
            Op::AddScalar(a, _) => vec![(*a, g.clone())],
            Op::MatMul(a, b) => {
                let (va, vb) = (self.var(*a), self.var(*b));
                vec![
                    (*a, g.matmul(&vb.transpose())),
                    (*b, va.transpose().matmul(g)),
                ]
            }
            Op::Transpose(a) => vec![(*a, g.transpose())],
            Op::Tanh(a) => vec![(*a, g - &(g * &out.square()))],
            Op::Sin(a) => vec![(*a, g * &self.var(*a).cos())],
            Op::Cos(a) => vec![(*a, -&(g * &self.var(*a).sin()))],
            Op::Square(a) => vec![(*a, &(g * &self.var(*a)) * 2.0)],
            Op::SumAll(a) => vec![(*a, g.broadcast_scalar(self.var(*a).shape()))],
            Op::SumRows(a) => vec![(*a, g.broadcast_rows(self.var(*a).shape().0))],
            Op::SumCols(a) => vec![(*a, g.broadcast_cols(self.var(*a).shape().1))],
            Op::BroadcastRows(a) => vec![(*a, g.sum_rows())],
            Op::BroadcastCols(a) => vec![(*a, g.sum_cols())],
            Op::BroadcastScalar(a) => vec![(*a, g.sum_all())],
            Op::SliceCols { src, start } => {
                vec![(*src, g.pad_cols(*start, self.var(*src).shape().1))]
            }
            Op::PadCols { src, start } => {
                vec![(*src, g.slice_cols(*start, self.var(*src).shape().1))]
            }
            Op::ConcatCols(parts) => {
                let mut offset = 0;
                parts
                    .iter()
                    .map(|&p| {
                        let width = self.var(p).shape().1;
                        let piece = g.slice_cols(offset, width);
                        offset += width;
                        (p, piece)
                    })
                    .collect()
            }
        }
    }

    /// Gradients of a scalar loss for every trainable parameter lifted onto
    /// this tape. Frozen parameters are absent from the result.
    pub fn param_grads(self: &Rc<Self>, loss: &Var) -> Result<Gradients> {
        let slots: Vec<(ParamId, usize)> = self
            .params
            .borrow()
            .iter()
            .filter(|(_, slot)| slot.trainable)
            .map(|(id, slot)| (*id, slot.index))
            .collect();
        let wrt: Vec<Var> = slots.iter().map(|&(_, index)| self.var(index)).collect();
        let grads = self.grad(loss, &wrt)?;

        let mut gradients = Gradients::new();
        for ((id, _), grad) in slots.into_iter().zip(grads) {
            gradients.insert(id, grad.to_array());
        }
        Ok(gradients)
    }
}

/// Handle to a node on a [`Tape`].
#[derive(Clone)]
pub struct Var {
    tape: Rc<Tape>,
    index: usize,
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (rows, cols) = self.shape();
        write!(f, "Var(index={}, shape=({},{}))", self.index, rows, cols)
    }
}

impl Var {
    pub fn tape(&self) -> &Rc<Tape> {
        &self.tape
    }

    pub fn value(&self) -> Rc<Array2<f64>> {
        self.tape.value_of(self.index)
    }

    /// Detached copy of the value.
    pub fn to_array(&self) -> Array2<f64> {
        self.value().as_ref().clone()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.value().dim()
    }

    /// First element; intended for `1 x 1` results such as losses. NaN when empty.
    pub fn item(&self) -> f64 {
        self.value().iter().next().copied().unwrap_or(f64::NAN)
    }

    fn same_tape(&self, other: &Var) -> bool {
        Rc::ptr_eq(&self.tape, &other.tape)
    }

    fn elementwise(&self, other: &Var, f: impl Fn(f64, f64) -> f64, op: Op) -> Var {
        if !self.same_tape(other) {
            return self.tape.record_fault(Error::ForeignTape, self.shape());
        }
        let (a, b) = (self.value(), other.value());
        if a.dim() != b.dim() {
            let (ra, ca) = a.dim();
            let (rb, cb) = b.dim();
            return self.tape.mismatch("elementwise operand", &[ra, ca], &[rb, cb], (ra, ca));
        }
        let mut value = a.as_ref().clone();
        value.zip_mut_with(b.as_ref(), |x, &y| *x = f(*x, y));
        self.tape.push(value, op)
    }

    fn unary(&self, f: impl Fn(f64) -> f64, op: Op) -> Var {
        let value = self.value().mapv(f);
        self.tape.push(value, op)
    }

    pub fn matmul(&self, other: &Var) -> Var {
        if !self.same_tape(other) {
            return self.tape.record_fault(Error::ForeignTape, self.shape());
        }
        let ((m, k), (k2, n)) = (self.shape(), other.shape());
        if k != k2 {
            return self.tape.mismatch("matmul inner dimension", &[k, n], &[k2, n], (m, n));
        }
        let value = self.value().dot(other.value().as_ref());
        self.tape.push(value, Op::MatMul(self.index, other.index))
    }

    pub fn transpose(&self) -> Var {
        let value = self.value().t().to_owned();
        self.tape.push(value, Op::Transpose(self.index))
    }

    pub fn tanh(&self) -> Var {
        self.unary(f64::tanh, Op::Tanh(self.index))
    }

    pub fn sin(&self) -> Var {
        self.unary(f64::sin, Op::Sin(self.index))
    }

    pub fn cos(&self) -> Var {
        self.unary(f64::cos, Op::Cos(self.index))
    }

    pub fn square(&self) -> Var {
        self.unary(|x| x * x, Op::Square(self.index))
    }

    /// Sum of all elements as a `1 x 1` var.
    pub fn sum_all(&self) -> Var {
        let value = Array2::from_elem((1, 1), self.value().sum());
        self.tape.push(value, Op::SumAll(self.index))
    }

    /// Sum over rows: `(m, n) -> (1, n)`.
    pub fn sum_rows(&self) -> Var {
        let value = self.value().sum_axis(Axis(0)).insert_axis(Axis(0));
        self.tape.push(value, Op::SumRows(self.index))
    }

    /// Sum over columns: `(m, n) -> (m, 1)`.
    pub fn sum_cols(&self) -> Var {
        let value = self.value().sum_axis(Axis(1)).insert_axis(Axis(1));
        self.tape.push(value, Op::SumCols(self.index))
    }

    /// Repeats a single row: `(1, n) -> (rows, n)`.
    pub fn broadcast_rows(&self, rows: usize) -> Var {
        let v = self.value();
        if v.nrows() != 1 {
            let found = [v.nrows(), v.ncols()];
            return self.tape.mismatch("broadcast_rows", &[1, v.ncols()], &found, (rows, v.ncols()));
        }
        let value = Array2::from_shape_fn((rows, v.ncols()), |(_, j)| v[[0, j]]);
        self.tape.push(value, Op::BroadcastRows(self.index))
    }

    /// Repeats a single column: `(m, 1) -> (m, cols)`.
    pub fn broadcast_cols(&self, cols: usize) -> Var {
        let v = self.value();
        if v.ncols() != 1 {
            let found = [v.nrows(), v.ncols()];
            return self.tape.mismatch("broadcast_cols", &[v.nrows(), 1], &found, (v.nrows(), cols));
        }
        let value = Array2::from_shape_fn((v.nrows(), cols), |(i, _)| v[[i, 0]]);
        self.tape.push(value, Op::BroadcastCols(self.index))
    }

    /// Fills `shape` with a `1 x 1` value.
    pub fn broadcast_scalar(&self, shape: (usize, usize)) -> Var {
        let v = self.value();
        if v.dim() != (1, 1) {
            return self.tape.mismatch("broadcast_scalar", &[1, 1], &[v.nrows(), v.ncols()], shape);
        }
        let value = Array2::from_elem(shape, v[[0, 0]]);
        self.tape.push(value, Op::BroadcastScalar(self.index))
    }

    /// Columns `start..start + width`.
    pub fn slice_cols(&self, start: usize, width: usize) -> Var {
        let (rows, cols) = self.shape();
        if start + width > cols {
            let needed = [rows, start + width];
            return self.tape.mismatch("column slice", &needed, &[rows, cols], (rows, width));
        }
        let value = self.value().slice(s![.., start..start + width]).to_owned();
        self.tape.push(
            value,
            Op::SliceCols {
                src: self.index,
                start,
            },
        )
    }

    pub fn column(&self, j: usize) -> Var {
        self.slice_cols(j, 1)
    }

    /// Places this var at column `start` of a zero matrix with `total` columns.
    pub fn pad_cols(&self, start: usize, total: usize) -> Var {
        let v = self.value();
        if start + v.ncols() > total {
            let needed = [v.nrows(), start + v.ncols()];
            return self.tape.mismatch("column padding", &[v.nrows(), total], &needed, (v.nrows(), total));
        }
        let mut value = Array2::zeros((v.nrows(), total));
        value
            .slice_mut(s![.., start..start + v.ncols()])
            .assign(v.as_ref());
        self.tape.push(
            value,
            Op::PadCols {
                src: self.index,
                start,
            },
        )
    }

    /// Joins vars side by side; all parts must share the tape and row count.
    pub fn concat_cols(parts: &[Var]) -> Result<Var> {
        let Some(first) = parts.first() else {
            return Err(Error::ShapeMismatch {
                context: "column concatenation",
                expected: vec![1],
                found: vec![0],
            });
        };
        let rows = first.shape().0;
        let mut total = 0;
        for part in parts {
            if !first.same_tape(part) {
                return Err(Error::ForeignTape);
            }
            let (r, c) = part.shape();
            if r != rows {
                return Err(Error::ShapeMismatch {
                    context: "column concatenation",
                    expected: vec![rows, c],
                    found: vec![r, c],
                });
            }
            total += c;
        }
        let mut value = Array2::zeros((rows, total));
        let mut offset = 0;
        for part in parts {
            let v = part.value();
            value
                .slice_mut(s![.., offset..offset + v.ncols()])
                .assign(v.as_ref());
            offset += v.ncols();
        }
        let indices = parts.iter().map(|p| p.index).collect();
        Ok(first.tape.push(value, Op::ConcatCols(indices)))
    }

    pub fn add_scalar(&self, c: f64) -> Var {
        self.unary(|x| x + c, Op::AddScalar(self.index, c))
    }
}

impl Add for &Var {
    type Output = Var;
    fn add(self, rhs: &Var) -> Var {
        self.elementwise(rhs, |a, b| a + b, Op::Add(self.index, rhs.index))
    }
}

impl Sub for &Var {
    type Output = Var;
    fn sub(self, rhs: &Var) -> Var {
        self.elementwise(rhs, |a, b| a - b, Op::Sub(self.index, rhs.index))
    }
}

impl Mul for &Var {
    type Output = Var;
    fn mul(self, rhs: &Var) -> Var {
        self.elementwise(rhs, |a, b| a * b, Op::Mul(self.index, rhs.index))
    }
}

impl Div for &Var {
    type Output = Var;
    fn div(self, rhs: &Var) -> Var {
        self.elementwise(rhs, |a, b| a / b, Op::Div(self.index, rhs.index))
    }
}

impl Mul<f64> for &Var {
    type Output = Var;
    fn mul(self, c: f64) -> Var {
        self.unary(|x| x * c, Op::Scale(self.index, c))
    }
}

impl Neg for &Var {
    type Output = Var;
    fn neg(self) -> Var {
        self.unary(|x| -x, Op::Neg(self.index))
    }
}
