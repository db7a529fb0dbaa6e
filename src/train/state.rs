//! Run counters

use serde::{Deserialize, Serialize};

/// Counters carried across steps and persisted in checkpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Completed train steps
    pub step: u64,
    /// Completed test steps
    pub validation_step: u64,
    /// Completed epochs
    pub epoch: usize,
}

impl TrainingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the train step about to run should also write a checkpoint
    pub fn is_checkpoint_step(&self, interval: u64) -> bool {
        interval > 0 && self.step > 0 && self.step % interval == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_step_skips_zero() {
        let mut state = TrainingState::new();
        assert!(!state.is_checkpoint_step(10));
        state.step = 20;
        assert!(state.is_checkpoint_step(10));
        assert!(!state.is_checkpoint_step(0));
        state.step = 21;
        assert!(!state.is_checkpoint_step(10));
    }
}
