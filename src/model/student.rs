//! Inverse autoregressive flow student

use super::layers::{time_window, CausalStack, StackConfig};
use super::params::{Initializer, ParameterSet};
use super::teacher::check_len;
use super::{
    check_capabilities, Conditioning, ConditioningLayout, FlowOutput, GaussianParams, ModelKind,
    SignalDims, Vocoder,
};
use crate::autograd::{add, clamp_min, exp, mul, slice_channels};
use crate::config::HParams;
use crate::error::Result;
use crate::Tensor;
use ndarray::Array1;

/// Stack of strictly causal affine flows.
///
/// Flow `f` maps `z_f = z_{f-1} * exp(s_f(z_{f-1})) + m_f(z_{f-1})`, where
/// `s_f` and `m_f` at step `t` only see `z_{f-1}` before `t`. Composing the
/// flows keeps every output sample Gaussian given the noise history, with
/// location and log-scale accumulated across flows.
#[derive(Debug, Clone)]
pub struct StudentNet {
    params: ParameterSet,
    conditioning: ConditioningLayout,
    flows: Vec<CausalStack>,
    log_scale_min: f32,
}

impl StudentNet {
    pub fn new(hp: &HParams, seed: u64) -> Self {
        let mut params = ParameterSet::new();
        let mut init = Initializer::new(seed);
        let conditioning = ConditioningLayout::new(hp, &mut params, &mut init);
        let flows = hp
            .iaf_layers
            .iter()
            .enumerate()
            .map(|(f, &layers)| {
                CausalStack::new(
                    &mut params,
                    &mut init,
                    &format!("flows.{f}."),
                    StackConfig {
                        in_channels: 1,
                        out_channels: 2,
                        layers,
                        stacks: hp.iaf_stacks,
                        residual_channels: hp.iaf_residual_channels,
                        kernel_size: hp.kernel_size,
                        cin_channels: conditioning.cin_channels,
                        n_speakers: conditioning.n_speakers,
                        input_shift: 1,
                    },
                )
            })
            .collect();
        Self { params, conditioning, flows, log_scale_min: hp.log_scale_min }
    }

    pub fn num_flows(&self) -> usize {
        self.flows.len()
    }
}

impl Vocoder for StudentNet {
    fn kind(&self) -> ModelKind {
        ModelKind::Student
    }

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
        let ctx = self.conditioning.prepare(&self.params, conditioning, dims)?;

        let mut z = input.clone();
        let mut loc = Tensor::zeros(dims.len(), false);
        let mut log_scale = Tensor::zeros(dims.len(), false);
        for flow in &self.flows {
            let out = flow.forward(&self.params, &z, &ctx, batch, time);
            let mu = slice_channels(&out, batch, 2, time, 0, 1);
            let ls = clamp_min(&slice_channels(&out, batch, 2, time, 1, 1), log_scale_min);
            let s = exp(&ls);

            z = add(&mul(&z, &s), &mu);
            loc = add(&mul(&loc, &s), &mu);
            log_scale = add(&log_scale, &ls);
        }

        Ok(FlowOutput { waveform: z, loc, scale: exp(&log_scale), log_scale })
    }

    /// Recovers the noise one flow and one step at a time, then reports the
    /// distribution the forward pass assigns. No gradient flows through this.
    fn score(
        &self,
        waveform: &Tensor,
        dims: SignalDims,
        conditioning: &Conditioning<'_>,
    ) -> Result<GaussianParams> {
        check_capabilities(self, conditioning)?;
        check_len("waveform", waveform, dims)?;
        let SignalDims { batch, time } = dims;
        let ctx = self
            .conditioning
            .prepare(&self.params, conditioning, dims)?
            .window(batch, time, 0, time);

        let mut current = waveform.data().clone();
        for flow in self.flows.iter().rev() {
            let rf = flow.receptive_field();
            let mut previous = Array1::<f32>::zeros(dims.len());
            for t in 0..time {
                let start = (t + 1).saturating_sub(rf);
                let len = t + 1 - start;
                let window = Tensor::new(time_window(&previous, batch, 1, time, start, len), false);
                let window_ctx = ctx.window(batch, time, start, len);
                let out = flow.forward(&self.params, &window, &window_ctx, batch, len);
                for b in 0..batch {
                    let mu = out.data()[(b * 2) * len + len - 1];
                    let ls = out.data()[(b * 2 + 1) * len + len - 1].max(self.log_scale_min);
                    let i = b * time + t;
                    previous[i] = (current[i] - mu) / ls.exp();
                }
            }
            current = previous;
        }

        let noise = Tensor::new(current, false);
        let forward = self.generate(&noise, dims, conditioning, self.log_scale_min)?;
        Ok(GaussianParams { loc: forward.loc.detach(), log_scale: forward.log_scale.detach() })
    }

    fn has_speaker_embedding(&self) -> bool {
        self.conditioning.n_speakers > 0
    }

    fn local_conditioning_enabled(&self) -> bool {
        self.conditioning.cin_channels > 0
    }

    fn receptive_field(&self) -> usize {
        self.flows.iter().map(CausalStack::receptive_field).sum()
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
