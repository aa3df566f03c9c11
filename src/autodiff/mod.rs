//! Reverse-mode automatic differentiation on an explicit tape.

mod tape;

pub use tape::{Tape, Var};
