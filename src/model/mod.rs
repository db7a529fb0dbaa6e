//! Vocoder networks
//!
//! Two models share one contract, [`Vocoder`]:
//!
//! - the **teacher**, an autoregressive Gaussian predictor whose output at
//!   step `t` is the distribution of sample `t + 1`;
//! - the **student**, a stack of inverse autoregressive affine flows that
//!   turns white noise into a waveform in one parallel pass, with the
//!   distribution of sample `t` reported at step `t`.
//!
//! All signals are flat `[batch, time]` buffers (one channel).

mod layers;
mod params;
mod student;
mod teacher;

pub use params::{ParamId, ParameterSet};
pub use student::StudentNet;
pub use teacher::TeacherNet;

use crate::config::HParams;
use crate::data::Batch;
use crate::error::{Error, Result};
use crate::Tensor;
use layers::{StackContext, Upsampler};
use params::Initializer;
use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which network to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Teacher,
    Student,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "teacher" => Ok(Self::Teacher),
            "student" => Ok(Self::Student),
            other => Err(Error::Serialization(format!("unknown model kind '{other}'"))),
        }
    }
}

/// Batch and time extent of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalDims {
    pub batch: usize,
    pub time: usize,
}

impl SignalDims {
    pub fn new(batch: usize, time: usize) -> Self {
        Self { batch, time }
    }

    pub fn len(&self) -> usize {
        self.batch * self.time
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Conditioning inputs of one forward pass
#[derive(Debug, Clone, Copy, Default)]
pub struct Conditioning<'a> {
    /// `[batch, cin_channels, frames]`
    pub local: Option<&'a Array3<f32>>,
    pub speakers: Option<&'a [usize]>,
}

impl<'a> Conditioning<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_batch(batch: &'a Batch) -> Self {
        Self { local: batch.conditioning.as_ref(), speakers: batch.speaker_ids.as_deref() }
    }
}

/// Student generation result, all `[batch, time]`
#[derive(Debug, Clone)]
pub struct FlowOutput {
    pub waveform: Tensor,
    pub loc: Tensor,
    pub scale: Tensor,
    pub log_scale: Tensor,
}

/// Per-step Gaussian parameters, `[batch, time]`; `log_scale` is unclamped
#[derive(Debug, Clone)]
pub struct GaussianParams {
    pub loc: Tensor,
    pub log_scale: Tensor,
}

/// Contract between the training loop and a vocoder network
pub trait Vocoder {
    fn kind(&self) -> ModelKind;

    /// Synthesize a waveform from standard-normal `input` noise.
    ///
    /// The student runs its flows in one parallel pass; the teacher samples
    /// ancestrally, one step at a time. Log-scales are floored at `log_scale_min`.
    fn generate(
        &self,
        input: &Tensor,
        dims: SignalDims,
        conditioning: &Conditioning<'_>,
        log_scale_min: f32,
    ) -> Result<FlowOutput>;

    /// Distribution parameters the model assigns to `waveform`.
    ///
    /// The student recovers its noise by inverting the flows step by step.
    fn score(
        &self,
        waveform: &Tensor,
        dims: SignalDims,
        conditioning: &Conditioning<'_>,
    ) -> Result<GaussianParams>;

    fn has_speaker_embedding(&self) -> bool;

    fn local_conditioning_enabled(&self) -> bool;

    /// Samples of history one output depends on
    fn receptive_field(&self) -> usize;

    fn parameters(&self) -> &ParameterSet;

    fn parameters_mut(&mut self) -> &mut ParameterSet;

    /// Same architecture over an independent copy of the parameters
    fn snapshot(&self) -> Box<dyn Vocoder>;
}

/// Build a freshly initialized network
pub fn build_model(kind: ModelKind, hp: &HParams, seed: u64) -> Box<dyn Vocoder> {
    tracing::debug!(%kind, seed, "building model");
    match kind {
        ModelKind::Teacher => Box::new(TeacherNet::new(hp, seed)),
        ModelKind::Student => Box::new(StudentNet::new(hp, seed)),
    }
}

/// Check that `conditioning` carries exactly what a model consumes
pub fn check_capabilities(model: &dyn Vocoder, conditioning: &Conditioning<'_>) -> Result<()> {
    let name = model.kind().as_str();
    let fail = |message: &str| Err(Error::Capability { model: name, message: message.into() });
    match (model.local_conditioning_enabled(), conditioning.local.is_some()) {
        (true, false) => return fail("expects conditioning features, but none were provided"),
        (false, true) => return fail("has no local conditioning, but features were provided"),
        _ => {}
    }
    match (model.has_speaker_embedding(), conditioning.speakers.is_some()) {
        (true, false) => fail("expects speaker ids, but none were provided"),
        (false, true) => fail("has no speaker embedding, but speaker ids were provided"),
        _ => Ok(()),
    }
}

/// Conditioning settings shared by both networks
#[derive(Debug, Clone)]
pub(crate) struct ConditioningLayout {
    cin_channels: usize,
    n_speakers: usize,
    upsampler: Option<Upsampler>,
}

impl ConditioningLayout {
    fn new(hp: &HParams, params: &mut ParameterSet, init: &mut Initializer) -> Self {
        let upsampler = hp
            .hop_aligned()
            .then(|| Upsampler::new(params, init, hp.cin_channels, hp.hop_size));
        Self {
            cin_channels: if hp.local_conditioning() { hp.cin_channels } else { 0 },
            n_speakers: if hp.global_conditioning() { hp.n_speakers } else { 0 },
            upsampler,
        }
    }

    /// Bring conditioning to sample rate as stack inputs
    fn prepare(
        &self,
        params: &ParameterSet,
        conditioning: &Conditioning<'_>,
        dims: SignalDims,
    ) -> Result<StackContext> {
        let SignalDims { batch, time } = dims;

        let local = match (conditioning.local, self.cin_channels) {
            (Some(c), cin) if cin > 0 => {
                let tensor = match &self.upsampler {
                    Some(up) => up.forward(params, c, time)?,
                    None => {
                        if c.dim() != (batch, cin, time) {
                            let (b, d, t) = c.dim();
                            return Err(Error::ShapeMismatch {
                                name: "conditioning".into(),
                                expected: vec![batch, cin, time],
                                actual: vec![b, d, t],
                            });
                        }
                        Tensor::new(c.iter().copied().collect(), false)
                    }
                };
                Some((tensor, cin))
            }
            _ => None,
        };

        let speakers = match (conditioning.speakers, self.n_speakers) {
            (Some(ids), n) if n > 0 => {
                if ids.len() != batch {
                    return Err(Error::Consistency(format!(
                        "{} speaker ids for a batch of {batch}",
                        ids.len()
                    )));
                }
                let mut one_hot = Array1::zeros(batch * n * time);
                for (b, &id) in ids.iter().enumerate() {
                    if id >= n {
                        return Err(Error::ConfigError(format!(
                            "speaker id {id} is out of range for n_speakers = {n}"
                        )));
                    }
                    let row = (b * n + id) * time;
                    one_hot.slice_mut(ndarray::s![row..row + time]).fill(1.0);
                }
                Some((Tensor::new(one_hot, false), n))
            }
            _ => None,
        };

        Ok(StackContext { local, speakers })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Small networks with hop-aligned conditioning
    pub(crate) fn tiny_hparams() -> HParams {
        HParams {
            cin_channels: 3,
            hop_size: 4,
            layers: 4,
            stacks: 2,
            residual_channels: 4,
            kernel_size: 2,
            iaf_layers: vec![2, 2],
            iaf_stacks: 1,
            iaf_residual_channels: 4,
            ..HParams::default()
        }
    }

    #[test]
    fn test_model_kind_round_trips_through_str() {
        for kind in [ModelKind::Teacher, ModelKind::Student] {
            assert_eq!(kind.to_string().parse::<ModelKind>().unwrap(), kind);
        }
        assert!("vocoder".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_capability_mismatch_names_model() {
        let hp = HParams { cin_channels: 0, gin_channels: 4, n_speakers: 2, ..tiny_hparams() };
        let model = build_model(ModelKind::Student, &hp, 0);

        let err = check_capabilities(model.as_ref(), &Conditioning::none()).unwrap_err();
        assert!(matches!(err, Error::Capability { model: "student", .. }));

        let ids = [1usize];
        let ok = Conditioning { local: None, speakers: Some(&ids) };
        assert!(check_capabilities(model.as_ref(), &ok).is_ok());

        let features = Array3::zeros((1, 2, 1));
        let extra = Conditioning { local: Some(&features), speakers: Some(&ids) };
        assert!(check_capabilities(model.as_ref(), &extra).is_err());
    }

    #[test]
    fn test_snapshot_does_not_share_storage() {
        let mut model = build_model(ModelKind::Teacher, &tiny_hparams(), 1);
        let copy = model.snapshot();
        model.parameters_mut().get_mut(0).data_mut().fill(5.0);

        assert_ne!(copy.parameters().get(0).data()[0], 5.0);
        assert_eq!(copy.parameters().len(), model.parameters().len());
        assert_eq!(copy.kind(), ModelKind::Teacher);
    }
}
