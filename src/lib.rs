//! wavedistill: parallel WaveNet vocoder distillation
//!
//! A student inverse-autoregressive-flow vocoder is trained to match a frozen
//! autoregressive Gaussian teacher. The loss is the per-sample KL divergence
//! from the student's output distribution to the teacher's prediction on the
//! student's own waveform, plus a two-band spectral power loss against the
//! reference audio.
//!
//! # Layout
//!
//! - [`autograd`] - tape-based reverse-mode differentiation over flat tensors
//! - [`model`] - teacher and student networks behind the [`model::Vocoder`] trait
//! - [`distill`] - KL and power losses with sequence masking
//! - [`optim`] - Adam, gradient clipping, learning rate schedules, EMA
//! - [`data`] - manifest datasets, length-grouped sampling, collation, loaders
//! - [`train`] - the train step, the epoch loop and metric recording
//! - [`io`] - SafeTensors checkpoints and WAV output
//! - [`config`] - hyperparameters, presets and the CLI surface

pub mod autograd;
pub mod cli;
pub mod config;
pub mod data;
pub mod distill;
pub mod error;
pub mod io;
pub mod model;
pub mod optim;
pub mod train;

pub use autograd::Tensor;
pub use error::{Error, Result};
