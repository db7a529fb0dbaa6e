//! Autoregressive Gaussian teacher

use super::layers::{time_window, CausalStack, StackConfig};
use super::params::{Initializer, ParameterSet};
use super::{
    check_capabilities, Conditioning, ConditioningLayout, FlowOutput, GaussianParams, ModelKind,
    SignalDims, Vocoder,
};
use crate::autograd::slice_channels;
use crate::config::HParams;
use crate::error::{Error, Result};
use crate::Tensor;
use ndarray::Array1;

/// Causal dilated network predicting `(loc, log_scale)` of the next sample
#[derive(Debug, Clone)]
pub struct TeacherNet {
    params: ParameterSet,
    conditioning: ConditioningLayout,
    stack: CausalStack,
}

impl TeacherNet {
    pub fn new(hp: &HParams, seed: u64) -> Self {
        let mut params = ParameterSet::new();
        let mut init = Initializer::new(seed);
        let conditioning = ConditioningLayout::new(hp, &mut params, &mut init);
        let stack = CausalStack::new(
            &mut params,
            &mut init,
            "",
            StackConfig {
                in_channels: 1,
                out_channels: hp.out_channels,
                layers: hp.layers,
                stacks: hp.stacks,
                residual_channels: hp.residual_channels,
                kernel_size: hp.kernel_size,
                cin_channels: conditioning.cin_channels,
                n_speakers: conditioning.n_speakers,
                input_shift: 0,
            },
        );
        Self { params, conditioning, stack }
    }

    fn split_output(&self, out: &Tensor, dims: SignalDims) -> GaussianParams {
        let channels = self.stack.config().out_channels;
        GaussianParams {
            loc: slice_channels(out, dims.batch, channels, dims.time, 0, 1),
            log_scale: slice_channels(out, dims.batch, channels, dims.time, 1, 1),
        }
    }
}

impl Vocoder for TeacherNet {
    fn kind(&self) -> ModelKind {
        ModelKind::Teacher
    }

    /// Ancestral sampling: `x[t] = loc[t-1] + exp(log_scale[t-1]) * input[t]`.
    ///
    /// The first sample has no history and is drawn from `N(0, exp(log_scale_min))`.
    /// Each step reruns the network over one receptive field, so this is meant
    /// for short signals.
    fn generate(
        &self,
        input: &Tensor,
        dims: SignalDims,
        conditioning: &Conditioning<'_>,
        log_scale_min: f32,
    ) -> Result<FlowOutput> {
        check_capabilities(self, conditioning)?;
        check_len("noise", input, dims)?;
        let SignalDims { batch, time } = dims;
        let ctx = self
            .conditioning
            .prepare(&self.params, conditioning, dims)?
            .window(batch, time, 0, time);
        let noise = input.data();
        let rf = self.stack.receptive_field();

        let mut x = Array1::<f32>::zeros(dims.len());
        let mut loc = Array1::<f32>::zeros(dims.len());
        let mut log_scale = Array1::<f32>::from_elem(dims.len(), log_scale_min);
        for b in 0..batch {
            if time > 0 {
                x[b * time] = log_scale_min.exp() * noise[b * time];
            }
        }

        for t in 1..time {
            let start = t.saturating_sub(rf);
            let len = t - start;
            let window = Tensor::new(time_window(&x, batch, 1, time, start, len), false);
            let window_ctx = ctx.window(batch, time, start, len);
            let out = self.stack.forward(&self.params, &window, &window_ctx, batch, len);
            let step = self.split_output(&out, SignalDims::new(batch, len));
            for b in 0..batch {
                let m = step.loc.data()[b * len + len - 1];
                let s = step.log_scale.data()[b * len + len - 1].max(log_scale_min);
                let i = b * time + t;
                loc[i] = m;
                log_scale[i] = s;
                x[i] = m + s.exp() * noise[i];
            }
        }

        let scale = log_scale.mapv(f32::exp);
        Ok(FlowOutput {
            waveform: Tensor::new(x, false),
            loc: Tensor::new(loc, false),
            scale: Tensor::new(scale, false),
            log_scale: Tensor::new(log_scale, false),
        })
    }

    /// Output `t` describes sample `t + 1`
    fn score(
        &self,
        waveform: &Tensor,
        dims: SignalDims,
        conditioning: &Conditioning<'_>,
    ) -> Result<GaussianParams> {
        check_capabilities(self, conditioning)?;
        check_len("waveform", waveform, dims)?;
        let ctx = self.conditioning.prepare(&self.params, conditioning, dims)?;
        let out = self.stack.forward(&self.params, waveform, &ctx, dims.batch, dims.time);
        Ok(self.split_output(&out, dims))
    }

    fn has_speaker_embedding(&self) -> bool {
        self.conditioning.n_speakers > 0
    }

    fn local_conditioning_enabled(&self) -> bool {
        self.conditioning.cin_channels > 0
    }

    fn receptive_field(&self) -> usize {
        self.stack.receptive_field()
    }

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn snapshot(&self) -> Box<dyn Vocoder> {
        Box::new(Self { params: self.params.snapshot(), ..self.clone() })
    }
}

pub(super) fn check_len(name: &str, t: &Tensor, dims: SignalDims) -> Result<()> {
    if t.len() != dims.len() {
        return Err(Error::ShapeMismatch {
            name: name.into(),
            expected: vec![dims.batch, dims.time],
            actual: vec![t.len()],
        });
    }
    Ok(())
}
