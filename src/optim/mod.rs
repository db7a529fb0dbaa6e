//! Optimizers, gradient clipping, learning rate schedules and parameter averaging

mod adam;
mod clip;
mod ema;
mod optimizer;
mod scheduler;

pub use adam::Adam;
pub use clip::{clip_grad_norm_refs, grad_norm_refs};
pub use ema::ExponentialMovingAverage;
pub use optimizer::Optimizer;
pub use scheduler::{CyclicCosineLR, LRScheduler, LrSchedule, NoamLR, StepDecayLR};
