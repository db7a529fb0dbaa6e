//! Distillation trainer
//!
//! [`Trainer`] owns the student, the frozen teacher, the optimizer and the
//! run counters. It provides:
//! - single distillation steps with clipping and parameter averaging
//! - held-out synthesis written as WAV files
//! - the train/test epoch loop with interrupt handling and a final checkpoint

mod core;
mod eval;
mod result;
mod step;
mod train_loop;

pub use core::Trainer;
pub use result::{LoopOutcome, TrainResult};
pub use step::standard_normal;
