//! Control Inputs: Forcing Signal and Input Gains
//!
//! The external force on the system is `u(t) · G(x)`:
//!
//! - [`InputFunction`]: the scalar signal u(t), selected by tag
//! - [`InputMatrix`]: the gain row G(x), static or learned

mod input;
mod matrix;

pub use input::InputFunction;
pub use matrix::{InputMatrix, InputMatrixSpec, StaticInputMatrix};
