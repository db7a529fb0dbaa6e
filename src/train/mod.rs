//! Distillation training
//!
//! This module provides:
//! - [`Trainer`], the train step and the epoch loop
//! - [`TrainingState`], the counters persisted in checkpoints
//! - [`MetricsRecorder`], scalar logging with an optional JSON-lines event log
//!
//! # Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use wavedistill::config::HParams;
//! use wavedistill::data::DataLoader;
//! use wavedistill::model::{build_model, ModelKind};
//! use wavedistill::train::Trainer;
//!
//! fn run(train: &DataLoader, test: &DataLoader) -> wavedistill::Result<()> {
//!     let hp = HParams::default();
//!     let teacher = build_model(ModelKind::Teacher, &hp, 0);
//!     let student = build_model(ModelKind::Student, &hp, 1);
//!     let mut trainer = Trainer::new(hp, teacher, student, "checkpoints", 1234);
//!     let result = trainer.train(train, test, &AtomicBool::new(false))?;
//!     println!("stopped at step {}", result.state.step);
//!     Ok(())
//! }
//! ```

mod metrics;
mod state;
mod trainer;

pub use metrics::{MetricsRecorder, Phase, RunningLoss, StepMetrics};
pub use state::TrainingState;
pub use trainer::{standard_normal, LoopOutcome, TrainResult, Trainer};
