//! Multi-epoch training loop

use super::core::Trainer;
use super::result::{LoopOutcome, TrainResult};
use crate::data::DataLoader;
use crate::error::Result;
use crate::train::{Phase, RunningLoss};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Losses of the most recent full phases
#[derive(Debug, Default)]
struct LastLosses {
    train: Option<f32>,
    test: Option<f32>,
}

impl Trainer {
    /// Train until `nepochs` or until `interrupt` is raised, then write a
    /// final checkpoint.
    ///
    /// The final checkpoint is written and the event log flushed on every
    /// exit path, including errors. When the loop fails, its error is
    /// returned and later failures are only logged.
    pub fn train(
        &mut self,
        train: &DataLoader,
        test: &DataLoader,
        interrupt: &AtomicBool,
    ) -> Result<TrainResult> {
        let start = Instant::now();
        let mut last = LastLosses::default();
        let outcome = self.run(train, test, interrupt, &mut last);

        let saved = self.save_checkpoint();
        match (&outcome, &saved) {
            (Err(_), Err(e)) => tracing::error!(error = %e, "final checkpoint failed"),
            (_, Ok(())) => tracing::info!(step = self.state.step, "final checkpoint written"),
            (Ok(_), Err(_)) => {}
        }
        let flushed = self.metrics.flush();
        if let (Err(_), Err(e)) = (&outcome, &flushed) {
            tracing::error!(error = %e, "event log flush failed");
        }
        let outcome = outcome?;
        saved?;
        flushed?;

        Ok(TrainResult {
            outcome,
            state: self.state,
            last_train_loss: last.train,
            last_test_loss: last.test,
            elapsed_secs: start.elapsed().as_secs_f64(),
        })
    }

    fn run(
        &mut self,
        train: &DataLoader,
        test: &DataLoader,
        interrupt: &AtomicBool,
        last: &mut LastLosses,
    ) -> Result<LoopOutcome> {
        if self.hp.exponential_moving_average && self.ema.is_none() {
            self.start_averaging();
        }
        tracing::info!(
            from_epoch = self.state.epoch,
            nepochs = self.hp.nepochs,
            train_batches = train.num_batches(),
            test_batches = test.num_batches(),
            "starting training"
        );

        while self.state.epoch < self.hp.nepochs {
            for (phase, loader) in [(Phase::Train, train), (Phase::Test, test)] {
                let Some(running) = self.run_phase(phase, loader, interrupt)? else {
                    tracing::warn!(step = self.state.step, epoch = self.state.epoch, "interrupted");
                    return Ok(LoopOutcome::Interrupted);
                };
                if running.steps > 0 {
                    let average = running.averages().0;
                    match phase {
                        Phase::Train => last.train = Some(average),
                        Phase::Test => last.test = Some(average),
                    }
                }
                self.metrics.record_epoch(phase, self.state.epoch, self.state.step, &running)?;
            }
            self.state.epoch += 1;
        }
        Ok(LoopOutcome::Completed)
    }

    /// One pass over `loader`; `None` when interrupted part way
    fn run_phase(
        &mut self,
        phase: Phase,
        loader: &DataLoader,
        interrupt: &AtomicBool,
    ) -> Result<Option<RunningLoss>> {
        let mut running = RunningLoss::default();
        let mut test_evaluated = false;
        let stream = loader.epoch(&mut self.rng);

        for batch in stream {
            if interrupt.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let batch = batch?;
            let evaluate = match phase {
                Phase::Train => {
                    self.state.step > 0
                        && self.hp.train_eval_interval > 0
                        && self.state.step % self.hp.train_eval_interval == 0
                }
                Phase::Test => {
                    let due = !test_evaluated
                        && self.hp.test_eval_epoch_interval > 0
                        && self.state.epoch % self.hp.test_eval_epoch_interval == 0;
                    test_evaluated |= due;
                    due
                }
            };

            let metrics = self.step(phase, &batch, evaluate)?;
            running.add(&metrics);
            match phase {
                Phase::Train => self.state.step += 1,
                Phase::Test => self.state.validation_step += 1,
            }
        }
        Ok(Some(running))
    }
}
