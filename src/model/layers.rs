//! Building blocks: causal convolutions, gated residual stacks, conditioning upsampler

use super::params::{Initializer, ParamId, ParameterSet};
use crate::autograd::{add, conv1d, mul, scale, sigmoid, slice_channels, tanh, ConvSpec};
use crate::error::{Error, Result};
use crate::Tensor;
use ndarray::{Array1, Array3};

/// Causal 1-D convolution whose weights live in a [`ParameterSet`]
#[derive(Debug, Clone)]
pub(crate) struct Conv1d {
    weight: ParamId,
    bias: Option<ParamId>,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    dilation: usize,
}

impl Conv1d {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        params: &mut ParameterSet,
        init: &mut Initializer,
        name: &str,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        dilation: usize,
        bias: bool,
    ) -> Self {
        let fan_in = in_channels * kernel_size;
        let weight = params.register(
            format!("{name}.weight"),
            vec![out_channels, in_channels, kernel_size],
            init.uniform(out_channels * in_channels * kernel_size, fan_in),
        );
        let bias = bias.then(|| {
            let values = init.uniform(out_channels, fan_in);
            params.register(format!("{name}.bias"), vec![out_channels], values)
        });
        Self { weight, bias, in_channels, out_channels, kernel_size, dilation }
    }

    /// 1x1 convolution
    pub(crate) fn pointwise(
        params: &mut ParameterSet,
        init: &mut Initializer,
        name: &str,
        in_channels: usize,
        out_channels: usize,
        bias: bool,
    ) -> Self {
        Self::new(params, init, name, in_channels, out_channels, 1, 1, bias)
    }

    fn spec(&self, batch: usize, time: usize, shift: usize) -> ConvSpec {
        ConvSpec {
            batch,
            in_channels: self.in_channels,
            out_channels: self.out_channels,
            time,
            kernel_size: self.kernel_size,
            dilation: self.dilation,
            shift,
        }
    }

    pub(crate) fn receptive_field(&self, shift: usize) -> usize {
        self.spec(1, 1, shift).receptive_field()
    }

    pub(crate) fn forward(
        &self,
        params: &ParameterSet,
        x: &Tensor,
        batch: usize,
        time: usize,
        shift: usize,
    ) -> Tensor {
        let bias = match self.bias {
            Some(id) => params.get(id).clone(),
            None => Tensor::zeros(self.out_channels, false),
        };
        conv1d(x, params.get(self.weight), &bias, self.spec(batch, time, shift))
    }
}

/// Conditioning shared by every layer of a stack, already at sample rate
#[derive(Debug, Clone, Default)]
pub(crate) struct StackContext {
    /// `[batch, cin_channels, time]`
    pub local: Option<(Tensor, usize)>,
    /// One-hot speakers, `[batch, n_speakers, time]`
    pub speakers: Option<(Tensor, usize)>,
}

impl StackContext {
    /// Detached copy of time steps `start..start + len`
    pub(crate) fn window(&self, batch: usize, time: usize, start: usize, len: usize) -> Self {
        let cut = |(t, channels): &(Tensor, usize)| {
            let window = time_window(t.data(), batch, *channels, time, start, len);
            (Tensor::new(window, false), *channels)
        };
        Self { local: self.local.as_ref().map(cut), speakers: self.speakers.as_ref().map(cut) }
    }
}

/// Time steps `start..start + len` of a flat `[batch, channels, time]` buffer
pub(crate) fn time_window(
    data: &Array1<f32>,
    batch: usize,
    channels: usize,
    time: usize,
    start: usize,
    len: usize,
) -> Array1<f32> {
    let mut out = Array1::zeros(batch * channels * len);
    for row in 0..batch * channels {
        for t in 0..len {
            out[row * len + t] = data[row * time + start + t];
        }
    }
    out
}

/// Geometry of a gated residual stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StackConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub layers: usize,
    pub stacks: usize,
    pub residual_channels: usize,
    pub kernel_size: usize,
    /// Zero disables local conditioning
    pub cin_channels: usize,
    /// Zero disables speaker conditioning
    pub n_speakers: usize,
    /// 0: output `t` sees input `t`; 1: strictly past inputs only
    pub input_shift: usize,
}

/// Gated activation unit with residual and skip outputs
#[derive(Debug, Clone)]
struct ResidualLayer {
    conv: Conv1d,
    conv1x1c: Option<Conv1d>,
    conv1x1g: Option<Conv1d>,
    conv1x1_out: Conv1d,
    conv1x1_skip: Conv1d,
    residual_channels: usize,
}

impl ResidualLayer {
    fn forward(
        &self,
        params: &ParameterSet,
        x: &Tensor,
        ctx: &StackContext,
        batch: usize,
        time: usize,
    ) -> (Tensor, Tensor) {
        let r = self.residual_channels;
        let mut h = self.conv.forward(params, x, batch, time, 0);
        if let (Some(conv), Some((c, _))) = (&self.conv1x1c, &ctx.local) {
            h = add(&h, &conv.forward(params, c, batch, time, 0));
        }
        if let (Some(conv), Some((g, _))) = (&self.conv1x1g, &ctx.speakers) {
            h = add(&h, &conv.forward(params, g, batch, time, 0));
        }

        let a = slice_channels(&h, batch, 2 * r, time, 0, r);
        let b = slice_channels(&h, batch, 2 * r, time, r, r);
        let z = mul(&tanh(&a), &sigmoid(&b));

        let skip = self.conv1x1_skip.forward(params, &z, batch, time, 0);
        let out = self.conv1x1_out.forward(params, &z, batch, time, 0);
        (scale(&add(x, &out), std::f32::consts::FRAC_1_SQRT_2), skip)
    }
}

/// Causal dilated convolution stack mapping `[B, in, T]` to `[B, out, T]`.
///
/// Dilations cycle `1, 2, 4, ...` within each of `stacks` repetitions.
#[derive(Debug, Clone)]
pub(crate) struct CausalStack {
    config: StackConfig,
    first_conv: Conv1d,
    layers: Vec<ResidualLayer>,
    last_conv: Conv1d,
}

impl CausalStack {
    pub(crate) fn new(
        params: &mut ParameterSet,
        init: &mut Initializer,
        prefix: &str,
        config: StackConfig,
    ) -> Self {
        let r = config.residual_channels;
        let per_stack = (config.layers / config.stacks.max(1)).max(1);
        let first_conv = Conv1d::pointwise(
            params,
            init,
            &format!("{prefix}first_conv"),
            config.in_channels,
            r,
            true,
        );

        let layers = (0..config.layers)
            .map(|i| {
                let name = format!("{prefix}layers.{i}");
                let dilation = 1 << (i % per_stack);
                let conv = Conv1d::new(
                    params,
                    init,
                    &format!("{name}.conv"),
                    r,
                    2 * r,
                    config.kernel_size,
                    dilation,
                    true,
                );
                let conv1x1c = (config.cin_channels > 0).then(|| {
                    let name = format!("{name}.conv1x1c");
                    Conv1d::pointwise(params, init, &name, config.cin_channels, 2 * r, false)
                });
                let conv1x1g = (config.n_speakers > 0).then(|| {
                    let name = format!("{name}.conv1x1g");
                    Conv1d::pointwise(params, init, &name, config.n_speakers, 2 * r, false)
                });
                let out_name = format!("{name}.conv1x1_out");
                let skip_name = format!("{name}.conv1x1_skip");
                ResidualLayer {
                    conv,
                    conv1x1c,
                    conv1x1g,
                    conv1x1_out: Conv1d::pointwise(params, init, &out_name, r, r, true),
                    conv1x1_skip: Conv1d::pointwise(params, init, &skip_name, r, r, true),
                    residual_channels: r,
                }
            })
            .collect();

        let last_name = format!("{prefix}last_conv");
        let last_conv =
            Conv1d::pointwise(params, init, &last_name, r, config.out_channels, true);
        Self { config, first_conv, layers, last_conv }
    }

    pub(crate) fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Samples of input history one output depends on
    pub(crate) fn receptive_field(&self) -> usize {
        let dilated: usize = self.layers.iter().map(|l| l.conv.receptive_field(0) - 1).sum();
        self.first_conv.receptive_field(self.config.input_shift) + dilated
    }

    pub(crate) fn forward(
        &self,
        params: &ParameterSet,
        x: &Tensor,
        ctx: &StackContext,
        batch: usize,
        time: usize,
    ) -> Tensor {
        let mut h = self.first_conv.forward(params, x, batch, time, self.config.input_shift);
        let mut skips: Option<Tensor> = None;
        for layer in &self.layers {
            let (next, skip) = layer.forward(params, &h, ctx, batch, time);
            h = next;
            skips = Some(match skips {
                Some(acc) => add(&acc, &skip),
                None => skip,
            });
        }
        let skips = match skips {
            Some(s) => scale(&s, (1.0 / self.layers.len() as f32).sqrt()),
            None => h,
        };
        self.last_conv.forward(params, &tanh(&skips), batch, time, 0)
    }
}

/// Frame-rate conditioning to sample rate: repeat each frame `hop` times,
/// then a learned 1x1 projection (`upsample.weight`, `upsample.bias`)
#[derive(Debug, Clone)]
pub(crate) struct Upsampler {
    conv: Conv1d,
    hop_size: usize,
    channels: usize,
}

impl Upsampler {
    pub(crate) fn new(
        params: &mut ParameterSet,
        init: &mut Initializer,
        channels: usize,
        hop_size: usize,
    ) -> Self {
        let conv = Conv1d::pointwise(params, init, "upsample", channels, channels, true);
        Self { conv, hop_size, channels }
    }

    /// `frames` is `[batch, channels, frames]`; the result covers `time` samples
    pub(crate) fn forward(
        &self,
        params: &ParameterSet,
        frames: &Array3<f32>,
        time: usize,
    ) -> Result<Tensor> {
        let (batch, channels, n_frames) = frames.dim();
        if channels != self.channels {
            return Err(Error::ShapeMismatch {
                name: "conditioning".into(),
                expected: vec![batch, self.channels, n_frames],
                actual: vec![batch, channels, n_frames],
            });
        }
        if n_frames * self.hop_size < time {
            return Err(Error::Consistency(format!(
                "{n_frames} conditioning frames at hop {} cover fewer than {time} samples",
                self.hop_size
            )));
        }

        let mut repeated = Array1::zeros(batch * channels * time);
        for b in 0..batch {
            for c in 0..channels {
                let row = (b * channels + c) * time;
                for t in 0..time {
                    repeated[row + t] = frames[[b, c, t / self.hop_size]];
                }
            }
        }
        let repeated = Tensor::new(repeated, false);
        Ok(self.conv.forward(params, &repeated, batch, time, 0))
    }
}
