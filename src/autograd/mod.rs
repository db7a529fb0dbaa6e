//! Tape-based autograd engine
//!
//! Tensors are flat `f32` buffers; every differentiable op records a
//! [`BackwardOp`] on its result. [`backward`] walks the recorded graph in
//! reverse topological order, so a tensor consumed by several ops receives
//! the sum of their contributions exactly once each.
//!
//! Convolutions and the distillation losses work on row-major
//! `[batch, channels, time]` layouts described by [`ConvSpec`].

mod backward;
mod ops;
mod tensor;

#[cfg(test)]
pub(crate) mod tests;

pub use backward::{backward, BackwardOp};
pub use ops::*;
pub use tensor::{GradCell, Tensor};
