//! Trainer state and setup

use crate::config::HParams;
use crate::distill::DistillationLoss;
use crate::error::Result;
use crate::io;
use crate::model::Vocoder;
use crate::optim::{Adam, ExponentialMovingAverage, LRScheduler};
use crate::train::{MetricsRecorder, Phase, TrainingState};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

/// Distills `student` from a frozen `teacher`.
///
/// Owns everything a step mutates: the student, its optimizer and moving
/// average, the run counters and the RNG used for noise and evaluation.
///
/// # Example
///
/// ```no_run
/// use wavedistill::config::HParams;
/// use wavedistill::model::{build_model, ModelKind};
/// use wavedistill::train::Trainer;
///
/// let hp = HParams::default();
/// let teacher = build_model(ModelKind::Teacher, &hp, 0);
/// let student = build_model(ModelKind::Student, &hp, 1);
/// let mut trainer = Trainer::new(hp, teacher, student, "checkpoints", 1234);
/// trainer.start_averaging();
/// ```
pub struct Trainer {
    pub(crate) hp: HParams,
    pub(crate) teacher: Box<dyn Vocoder>,
    pub(crate) student: Box<dyn Vocoder>,
    pub(crate) optimizer: Adam,
    pub(crate) scheduler: Box<dyn LRScheduler>,
    pub(crate) ema: Option<ExponentialMovingAverage>,
    pub(crate) loss_fn: DistillationLoss,
    pub(crate) checkpoint_dir: PathBuf,
    pub(crate) metrics: MetricsRecorder,
    pub(crate) rng: StdRng,
    pub(crate) state: TrainingState,
}

impl Trainer {
    pub fn new(
        hp: HParams,
        teacher: Box<dyn Vocoder>,
        student: Box<dyn Vocoder>,
        checkpoint_dir: impl Into<PathBuf>,
        seed: u64,
    ) -> Self {
        let optimizer =
            Adam::new(hp.initial_learning_rate, hp.adam_beta1, hp.adam_beta2, hp.adam_eps)
                .with_weight_decay(hp.weight_decay)
            .with_amsgrad(hp.amsgrad);
        let scheduler = hp.lr_schedule.build(hp.initial_learning_rate);
        let loss_fn = DistillationLoss::new(hp.log_scale_min, hp.sample_rate);
        Self {
            teacher,
            student,
            optimizer,
            scheduler,
            ema: None,
            loss_fn,
            checkpoint_dir: checkpoint_dir.into(),
            metrics: MetricsRecorder::new(),
            rng: StdRng::seed_from_u64(seed),
            state: TrainingState::new(),
            hp,
        }
    }

    /// Replace the default in-memory recorder
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = metrics;
        self
    }

    /// Resume the student, its optimizer and the counters from a checkpoint
    pub fn resume(&mut self, path: &Path, reset_optimizer: bool) -> Result<()> {
        self.state = io::resume(path, self.student.as_mut(), &mut self.optimizer, reset_optimizer)?;
        if self.ema.is_some() {
            self.start_averaging();
        }
        Ok(())
    }

    /// Shadow the current trainable student parameters
    pub fn start_averaging(&mut self) {
        let ema =
            ExponentialMovingAverage::new(self.hp.ema_decay, &self.student.parameters().tensors());
        tracing::info!(parameters = ema.len(), decay = self.hp.ema_decay, "moving average enabled");
        self.ema = Some(ema);
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn hparams(&self) -> &HParams {
        &self.hp
    }

    pub fn student(&self) -> &dyn Vocoder {
        self.student.as_ref()
    }

    pub fn teacher(&self) -> &dyn Vocoder {
        self.teacher.as_ref()
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    pub fn ema(&self) -> Option<&ExponentialMovingAverage> {
        self.ema.as_ref()
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    /// Where held-out synthesis for `phase` is written
    pub fn eval_dir(&self, phase: Phase) -> PathBuf {
        self.checkpoint_dir.join(format!("{phase}_eval"))
    }

    /// Where intermediate training audio is written
    pub fn audio_dir(&self) -> PathBuf {
        self.checkpoint_dir.join("audio")
    }

    /// Checkpoint the student (and its average) at the current step
    pub fn save_checkpoint(&self) -> Result<()> {
        let optimizer = self.hp.save_optimizer_state.then_some(&self.optimizer);
        io::save_checkpoints(
            &self.checkpoint_dir,
            self.student.as_ref(),
            optimizer,
            self.ema.as_ref(),
            &self.state,
        )
    }
}
