//! Noam learning rate schedule

use super::LRScheduler;

/// Noam Learning Rate Scheduler
///
/// Formula: lr = lr_initial * w^0.5 * min(s * w^-1.5, s^-0.5), s = step + 1
///
/// Peaks at `lr_initial` when `s == w` and decays as `1/√s` afterwards.
#[derive(Debug, Clone, Copy)]
pub struct NoamLR {
    lr_initial: f32,
    warmup_steps: u64,
}

impl NoamLR {
    pub fn new(lr_initial: f32, warmup_steps: u64) -> Self {
        Self { lr_initial, warmup_steps }
    }
}

impl LRScheduler for NoamLR {
    fn lr_at(&self, step: u64) -> f32 {
        let s = (step + 1) as f64;
        let w = self.warmup_steps.max(1) as f64;
        let factor = w.sqrt() * (s * w.powf(-1.5)).min(s.powf(-0.5));
        (f64::from(self.lr_initial) * factor) as f32
    }
}
