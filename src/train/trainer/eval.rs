//! Audio written during training

use super::core::Trainer;
use super::step::standard_normal;
use crate::config::{HParams, InputType};
use crate::data::{inv_mulaw, inv_mulaw_quantize, Batch};
use crate::error::Result;
use crate::io::{self, write_wav};
use crate::model::{check_capabilities, Conditioning, FlowOutput, GaussianParams, SignalDims};
use crate::train::Phase;
use crate::Tensor;
use ndarray::{s, Array3};
use rand::Rng;
use std::path::Path;

/// Draw `loc + exp(max(log_scale, log_scale_min)) * z`
fn sample_gaussian<R: Rng + ?Sized>(
    loc: &[f32],
    log_scale: &[f32],
    log_scale_min: f32,
    rng: &mut R,
) -> Vec<f32> {
    let z = standard_normal(rng, loc.len());
    loc.iter()
        .zip(log_scale)
        .zip(z)
        .map(|((&m, &ls), z)| m + ls.max(log_scale_min).exp() * z)
        .collect()
}

/// Generated samples back to linear amplitude
fn decode_generated(hp: &HParams, samples: &mut [f32]) {
    if hp.input_type != InputType::Raw {
        let mu = hp.quantize_channels.saturating_sub(1).max(1) as f32;
        samples.iter_mut().for_each(|x| *x = inv_mulaw(*x, mu));
    }
}

/// Targets back to linear amplitude
fn decode_target(hp: &HParams, samples: &mut [f32]) {
    let mu = hp.quantize_channels.saturating_sub(1).max(1) as f32;
    match hp.input_type {
        InputType::Raw => {}
        InputType::Mulaw => samples.iter_mut().for_each(|x| *x = inv_mulaw(*x, mu)),
        InputType::MulawQuantize => {
            samples.iter_mut().for_each(|x| *x = inv_mulaw_quantize(*x, mu));
        }
    }
}

fn write_triplet(
    dir: &Path,
    step: u64,
    sample_rate: u32,
    student: &[f32],
    teacher: &[f32],
    target: &[f32],
) -> Result<()> {
    for (name, samples) in [("student", student), ("teacher", teacher), ("target", target)] {
        write_wav(&dir.join(format!("step{step:09}_{name}.wav")), samples, sample_rate)?;
    }
    Ok(())
}

impl Trainer {
    /// Synthesize one random example of `batch` from fresh noise.
    ///
    /// Uses the averaged student when a moving average is kept. The teacher
    /// output is a sample from its distribution over the student waveform.
    pub fn evaluate(&mut self, phase: Phase, batch: &Batch) -> Result<()> {
        let idx = self.rng.random_range(0..batch.batch_size());
        let length = batch.lengths[idx];
        let mut target = batch.target_waveforms().row(idx).slice(s![..length]).to_vec();

        let local: Option<Array3<f32>> = batch.conditioning.as_ref().map(|c| {
            let frames = if self.hp.hop_aligned() { length / self.hp.hop_size } else { length };
            c.slice(s![idx..idx + 1, .., ..frames.min(c.shape()[2])]).to_owned()
        });
        let speakers = batch.speaker_ids.as_ref().map(|ids| vec![ids[idx]]);
        let conditioning = Conditioning { local: local.as_ref(), speakers: speakers.as_deref() };
        tracing::info!(%phase, step = self.state.step, example = idx, length, "evaluating");

        let student = match self.ema.as_ref() {
            Some(ema) => io::averaged_model(self.student.as_ref(), ema),
            None => self.student.snapshot(),
        };
        check_capabilities(student.as_ref(), &conditioning)?;

        let dims = SignalDims::new(1, length);
        let noise = Tensor::from_vec(standard_normal(&mut self.rng, length), false);
        let out = student.generate(&noise, dims, &conditioning, self.hp.log_scale_min)?;
        let teacher = self.teacher.score(&out.waveform.detach(), dims, &conditioning)?;

        let mut student_hat = out.waveform.data().to_vec();
        let loc = teacher.loc.data().to_vec();
        let log_scale = teacher.log_scale.data().to_vec();
        let mut teacher_hat =
            sample_gaussian(&loc, &log_scale, self.hp.log_scale_min, &mut self.rng);
        decode_generated(&self.hp, &mut student_hat);
        decode_generated(&self.hp, &mut teacher_hat);
        decode_target(&self.hp, &mut target);

        write_triplet(
            &self.eval_dir(phase),
            self.state.step,
            self.hp.sample_rate,
            &student_hat,
            &teacher_hat,
            &target,
        )
    }

    /// Write the current train step's student, teacher and target audio for
    /// one random example, zeroed past its length.
    pub(crate) fn save_states(
        &mut self,
        student: &FlowOutput,
        teacher: &GaussianParams,
        batch: &Batch,
    ) -> Result<()> {
        tracing::info!(step = self.state.step, "saving intermediate states");
        let time = batch.max_time();
        let idx = self.rng.random_range(0..batch.batch_size());
        let length = batch.lengths[idx];
        let row = idx * time..(idx + 1) * time;

        let mut student_hat = student.waveform.data().slice(s![row.clone()]).to_vec();
        let loc = teacher.loc.data().slice(s![row.clone()]).to_vec();
        let log_scale = teacher.log_scale.data().slice(s![row]).to_vec();
        let mut teacher_hat =
            sample_gaussian(&loc, &log_scale, self.hp.log_scale_min, &mut self.rng);
        let mut target = batch.target_waveforms().row(idx).to_vec();

        decode_generated(&self.hp, &mut student_hat);
        decode_generated(&self.hp, &mut teacher_hat);
        decode_target(&self.hp, &mut target);
        for samples in [&mut student_hat, &mut teacher_hat, &mut target] {
            samples[length.min(time)..].fill(0.0);
        }

        write_triplet(
            &self.audio_dir(),
            self.state.step,
            self.hp.sample_rate,
            &student_hat,
            &teacher_hat,
            &target,
        )
    }
}
