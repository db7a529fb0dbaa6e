//! Autograd operations with backward passes

mod activations;
mod basic;
mod conv;

pub use activations::{clamp_min, exp, sigmoid, tanh};
pub use basic::{add, mul, scale, sum};
pub use conv::{conv1d, slice_channels, ConvSpec};
