//! Learning rate schedules
//!
//! Schedules are stateless functions of the global train step, so a resumed
//! run picks the rate back up from the restored step counter:
//! - `NoamLR` - inverse square root decay after linear warmup
//! - `StepDecayLR` - multiply by a fixed rate every interval
//! - `CyclicCosineLR` - cosine annealing restarted every `T / M` steps

mod cyclic_cosine;
mod noam;
mod step_decay;

#[cfg(test)]
mod tests;

pub use cyclic_cosine::CyclicCosineLR;
pub use noam::NoamLR;
pub use step_decay::StepDecayLR;

use super::Optimizer;
use serde::{Deserialize, Serialize};

/// Learning rate scheduler trait
pub trait LRScheduler {
    /// Learning rate for the given global step
    fn lr_at(&self, step: u64) -> f32;

    /// Apply the rate for `step` to an optimizer
    fn apply(&self, optimizer: &mut dyn Optimizer, step: u64) -> f32 {
        let lr = self.lr_at(step);
        optimizer.set_lr(lr);
        lr
    }
}

/// Schedule selection as it appears in hyperparameter files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LrSchedule {
    /// Keep the initial rate
    Constant,
    Noam {
        #[serde(default = "default_warmup_steps")]
        warmup_steps: u64,
    },
    StepDecay {
        #[serde(default = "default_anneal_rate")]
        anneal_rate: f32,
        #[serde(default = "default_anneal_interval")]
        anneal_interval: u64,
    },
    CyclicCosine {
        total_steps: u64,
        cycles: u64,
    },
}

fn default_warmup_steps() -> u64 {
    4000
}

fn default_anneal_rate() -> f32 {
    0.5
}

fn default_anneal_interval() -> u64 {
    200_000
}

impl Default for LrSchedule {
    fn default() -> Self {
        Self::Noam { warmup_steps: default_warmup_steps() }
    }
}

impl LrSchedule {
    /// Build the scheduler for a given initial rate
    pub fn build(&self, initial_lr: f32) -> Box<dyn LRScheduler> {
        match *self {
            Self::Constant => Box::new(ConstantLR(initial_lr)),
            Self::Noam { warmup_steps } => Box::new(NoamLR::new(initial_lr, warmup_steps)),
            Self::StepDecay { anneal_rate, anneal_interval } => {
                Box::new(StepDecayLR::new(initial_lr, anneal_interval, anneal_rate))
            }
            Self::CyclicCosine { total_steps, cycles } => {
                Box::new(CyclicCosineLR::new(initial_lr, total_steps, cycles))
            }
        }
    }

    /// Parameter sanity: zero intervals make the formulas divide by zero
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Self::Noam { warmup_steps: 0 } => Err("noam warmup_steps must be positive".into()),
            Self::StepDecay { anneal_interval: 0, .. } => {
                Err("step_decay anneal_interval must be positive".into())
            }
            Self::CyclicCosine { total_steps, cycles } if cycles == 0 || total_steps < cycles => {
                Err("cyclic_cosine needs 0 < cycles <= total_steps".into())
            }
            _ => Ok(()),
        }
    }
}

struct ConstantLR(f32);

impl LRScheduler for ConstantLR {
    fn lr_at(&self, _step: u64) -> f32 {
        self.0
    }
}
