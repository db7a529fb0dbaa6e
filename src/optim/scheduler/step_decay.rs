//! Step decay learning rate schedule

use super::LRScheduler;

/// Step Decay Learning Rate Scheduler
///
/// Formula: lr = lr_initial * rate^(floor(step / interval))
#[derive(Debug, Clone, Copy)]
pub struct StepDecayLR {
    lr_initial: f32,
    anneal_interval: u64,
    anneal_rate: f32,
}

impl StepDecayLR {
    /// # Arguments
    /// * `lr_initial` - Initial learning rate
    /// * `anneal_interval` - Decay every this many steps
    /// * `anneal_rate` - Multiplicative factor per decay
    pub fn new(lr_initial: f32, anneal_interval: u64, anneal_rate: f32) -> Self {
        Self { lr_initial, anneal_interval, anneal_rate }
    }
}

impl LRScheduler for StepDecayLR {
    fn lr_at(&self, step: u64) -> f32 {
        if self.anneal_interval == 0 {
            return self.lr_initial;
        }
        let num_decays = step / self.anneal_interval;
        self.lr_initial * self.anneal_rate.powi(num_decays as i32)
    }
}
