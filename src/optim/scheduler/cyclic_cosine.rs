//! Cyclic cosine annealing

use super::LRScheduler;
use std::f64::consts::PI;

/// Cosine annealing with `cycles` warm restarts over `total_steps`.
///
/// Formula: lr = lr_initial / 2 * (cos(π * ((step - 1) mod P) / P) + 1), P = total_steps / cycles
#[derive(Debug, Clone, Copy)]
pub struct CyclicCosineLR {
    lr_initial: f32,
    period: u64,
}

impl CyclicCosineLR {
    pub fn new(lr_initial: f32, total_steps: u64, cycles: u64) -> Self {
        let period = (total_steps / cycles.max(1)).max(1);
        Self { lr_initial, period }
    }
}

impl LRScheduler for CyclicCosineLR {
    fn lr_at(&self, step: u64) -> f32 {
        let period = self.period as i64;
        let phase = (step as i64 - 1).rem_euclid(period) as f64 / period as f64;
        (f64::from(self.lr_initial) / 2.0 * ((PI * phase).cos() + 1.0)) as f32
    }
}
