//! One distillation step

use super::core::Trainer;
use crate::autograd::backward;
use crate::data::Batch;
use crate::error::Result;
use crate::model::{check_capabilities, Conditioning, SignalDims};
use crate::optim::{clip_grad_norm_refs, grad_norm_refs, Optimizer};
use crate::train::{Phase, StepMetrics};
use crate::Tensor;
use rand::Rng;

/// `n` standard-normal samples by the Box-Muller transform
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(n + 1);
    while out.len() < n {
        // 1 - U keeps the logarithm finite
        let u1 = 1.0 - rng.random::<f32>();
        let u2 = rng.random::<f32>();
        let radius = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f32::consts::PI * u2;
        out.push(radius * theta.cos());
        out.push(radius * theta.sin());
    }
    out.truncate(n);
    out
}

impl Trainer {
    /// Run one step on `batch`.
    ///
    /// Train steps update the student; test steps only measure. On train
    /// steps that land on the checkpoint interval, intermediate audio and a
    /// checkpoint are written before the update. With `evaluate`, a held-out
    /// synthesis is written as well.
    pub fn step(&mut self, phase: Phase, batch: &Batch, evaluate: bool) -> Result<StepMetrics> {
        let conditioning = Conditioning::from_batch(batch);
        check_capabilities(self.student.as_ref(), &conditioning)?;
        check_capabilities(self.teacher.as_ref(), &conditioning)?;

        let train = phase.is_train();
        let step = if train { self.state.step } else { self.state.validation_step };
        let learning_rate = train.then(|| self.scheduler.apply(&mut self.optimizer, step));

        let dims = SignalDims::new(batch.batch_size(), batch.max_time());
        let target = batch.target_waveforms();
        let noise = Tensor::from_vec(standard_normal(&mut self.rng, dims.len()), false);

        let student_out =
            self.student.generate(&noise, dims, &conditioning, self.hp.log_scale_min)?;
        let teacher_out = self.teacher.score(&student_out.waveform, dims, &conditioning)?;
        let losses =
            self.loss_fn.forward(&student_out, &teacher_out, &target, &batch.lengths, dims)?;
        let (loss, kl_loss, power_loss) = losses.values();

        if train && self.state.is_checkpoint_step(self.hp.checkpoint_interval) {
            self.save_states(&student_out, &teacher_out, batch)?;
            self.save_checkpoint()?;
        }
        if evaluate {
            self.evaluate(phase, batch)?;
        }

        let mut grad_norm = None;
        if train {
            self.student.parameters().zero_grad();
            let mut total = losses.total;
            backward(&mut total, None);
            // release the graph so parameter updates do not copy shared storage
            drop((total, losses.kl, losses.power, student_out, teacher_out));

            let mut params = self.student.parameters_mut().tensors_mut();
            grad_norm = Some(if self.hp.clip_thresh > 0.0 {
                clip_grad_norm_refs(&mut params, self.hp.clip_thresh)
            } else {
                grad_norm_refs(&params)
            });
            self.optimizer.step_refs(&mut params);
            if let Some(ema) = self.ema.as_mut() {
                ema.update(&self.student.parameters().tensors());
            }
        }

        let metrics = StepMetrics { loss, kl_loss, power_loss, grad_norm, learning_rate };
        self.metrics.record_step(phase, step, &metrics)?;
        if !loss.is_finite() {
            tracing::warn!(%phase, step, loss, "non-finite loss");
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HParams;
    use crate::model::{build_model, tests::tiny_hparams, ModelKind};
    use crate::optim::LrSchedule;
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn batch(hp: &HParams, lengths: &[usize]) -> Batch {
        let time = *lengths.iter().max().unwrap();
        let frames = time / hp.hop_size;
        let b = lengths.len();
        let targets = Array3::from_shape_fn((b, time, 1), |(i, t, _)| {
            if t < lengths[i] {
                (t as f32 * 0.2 + i as f32).sin() * 0.5
            } else {
                0.0
            }
        });
        Batch {
            inputs: targets.clone().permuted_axes([0, 2, 1]).as_standard_layout().to_owned(),
            targets,
            conditioning: Some(Array3::from_shape_fn((b, hp.cin_channels, frames), |(i, c, f)| {
                ((i + c + f) as f32 * 0.3).cos()
            })),
            speaker_ids: None,
            lengths: lengths.to_vec(),
        }
    }

    fn trainer(hp: HParams, dir: &std::path::Path) -> Trainer {
        let mut teacher = build_model(ModelKind::Teacher, &hp, 0);
        teacher.parameters_mut().freeze_all();
        let student = build_model(ModelKind::Student, &hp, 1);
        Trainer::new(hp, teacher, student, dir, 7)
    }

    #[test]
    fn test_standard_normal_moments() {
        let mut rng = StdRng::seed_from_u64(3);
        let xs = standard_normal(&mut rng, 20_001);
        assert_eq!(xs.len(), 20_001);
        let mean = xs.iter().sum::<f32>() / xs.len() as f32;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / xs.len() as f32;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.05, "variance {var}");
        assert!(xs.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_train_step_updates_student_only() {
        let tmp = TempDir::new().unwrap();
        let hp = HParams {
            checkpoint_interval: 1000,
            lr_schedule: LrSchedule::Constant,
            clip_thresh: 0.0,
            ..tiny_hparams()
        };
        let mut trainer = trainer(hp.clone(), tmp.path());
        trainer.start_averaging();
        let teacher_before = trainer.teacher().parameters().snapshot();
        let student_before = trainer.student().parameters().snapshot();

        let metrics = trainer.step(Phase::Train, &batch(&hp, &[16, 12]), false).unwrap();
        assert!(metrics.loss.is_finite());
        assert!(metrics.kl_loss.is_finite() && metrics.power_loss.is_finite());
        assert_eq!(metrics.learning_rate, Some(hp.initial_learning_rate));
        assert_eq!(trainer.optimizer().step_count(), 1);
        // unclipped steps still report the gradient norm
        let norm = metrics.grad_norm.unwrap();
        assert!(norm.is_finite() && norm > 0.0);
        assert_eq!(trainer.metrics().latest("gradient norm"), Some((0, norm)));

        for (id, (_, _, t)) in teacher_before.iter().enumerate() {
            assert_eq!(t.data(), trainer.teacher().parameters().get(id).data());
        }
        let changed = student_before
            .iter()
            .enumerate()
            .any(|(id, (_, _, t))| t.data() != trainer.student().parameters().get(id).data());
        assert!(changed);
        assert!(trainer.metrics().latest("train loss").is_some());
    }

    #[test]
    fn test_test_step_leaves_student_alone() {
        let tmp = TempDir::new().unwrap();
        let hp = tiny_hparams();
        let mut trainer = trainer(hp.clone(), tmp.path());
        let before = trainer.student().parameters().snapshot();

        let metrics = trainer.step(Phase::Test, &batch(&hp, &[16]), false).unwrap();
        assert_eq!(metrics.learning_rate, None);
        assert_eq!(metrics.grad_norm, None);
        assert_eq!(trainer.optimizer().step_count(), 0);
        assert_eq!(before.get(0).data(), trainer.student().parameters().get(0).data());
    }

    #[test]
    fn test_checkpoint_interval_writes_before_update() {
        let tmp = TempDir::new().unwrap();
        let hp = HParams { checkpoint_interval: 2, clip_thresh: 1.0, ..tiny_hparams() };
        let mut trainer = trainer(hp.clone(), tmp.path());
        trainer.state.step = 2;

        let metrics = trainer.step(Phase::Train, &batch(&hp, &[16]), false).unwrap();
        assert!(metrics.grad_norm.is_some());
        assert!(tmp.path().join("checkpoint_step000000002.safetensors").exists());
        assert!(tmp.path().join("audio").join("step000000002_student.wav").exists());
        assert!(tmp.path().join("audio").join("step000000002_teacher.wav").exists());
        assert!(tmp.path().join("audio").join("step000000002_target.wav").exists());
    }

    #[test]
    fn test_missing_conditioning_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let hp = tiny_hparams();
        let mut trainer = trainer(hp.clone(), tmp.path());
        let mut b = batch(&hp, &[16]);
        b.conditioning = None;
        let err = trainer.step(Phase::Train, &b, false).unwrap_err();
        assert!(matches!(err, crate::Error::Capability { .. }));
    }
}
