//! Training result types

use crate::train::TrainingState;

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// All configured epochs ran
    Completed,
    /// The interrupt flag was raised between steps
    Interrupted,
}

/// Result of a training run
#[derive(Debug, Clone)]
pub struct TrainResult {
    pub outcome: LoopOutcome,
    /// Counters at exit, as written to the final checkpoint
    pub state: TrainingState,
    /// Average train loss of the last full train phase
    pub last_train_loss: Option<f32>,
    /// Average test loss of the last full test phase
    pub last_test_loss: Option<f32>,
    /// Total training time in seconds
    pub elapsed_secs: f64,
}

impl TrainResult {
    pub fn interrupted(&self) -> bool {
        self.outcome == LoopOutcome::Interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_follows_outcome() {
        let result = TrainResult {
            outcome: LoopOutcome::Interrupted,
            state: TrainingState::new(),
            last_train_loss: None,
            last_test_loss: Some(0.5),
            elapsed_secs: 1.0,
        };
        assert!(result.interrupted());
        let done = TrainResult { outcome: LoopOutcome::Completed, ..result };
        assert!(!done.interrupted());
    }
}
