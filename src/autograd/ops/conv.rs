//! Causal 1-D convolution and channel slicing over `[batch, channels, time]` buffers
//!
//! Tensors are flat; layouts are row-major `[batch, channels, time]` and
//! weights are `[out_channels, in_channels, kernel_size]`.

use crate::autograd::{BackwardOp, GradCell, Tensor};
use ndarray::Array1;
use std::rc::Rc;

/// Geometry of a causal convolution.
///
/// Output sample `t` reads inputs `t - shift - (kernel_size - 1 - k) * dilation`
/// for `k in 0..kernel_size`; reads before the start see zeros. With
/// `shift = 0` the output at `t` depends on inputs up to and including `t`,
/// with `shift = 1` only on inputs strictly before `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvSpec {
    pub batch: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub time: usize,
    pub kernel_size: usize,
    pub dilation: usize,
    pub shift: usize,
}

impl ConvSpec {
    fn offset(&self, k: usize) -> usize {
        self.shift + (self.kernel_size - 1 - k) * self.dilation
    }

    /// Number of past samples (including the current one when `shift = 0`) an output sees
    pub fn receptive_field(&self) -> usize {
        (self.kernel_size - 1) * self.dilation + 1 + self.shift
    }
}

/// Causal dilated convolution with bias
pub fn conv1d(x: &Tensor, weight: &Tensor, bias: &Tensor, spec: ConvSpec) -> Tensor {
    let ConvSpec { batch, in_channels, out_channels, time, kernel_size, .. } = spec;
    assert_eq!(x.len(), batch * in_channels * time, "conv1d: input size mismatch");
    assert_eq!(
        weight.len(),
        out_channels * in_channels * kernel_size,
        "conv1d: weight size mismatch"
    );
    assert_eq!(bias.len(), out_channels, "conv1d: bias size mismatch");

    let xs = x.data().as_slice().expect("conv input must be contiguous");
    let ws = weight.data().as_slice().expect("conv weight must be contiguous");
    let bs = bias.data().as_slice().expect("conv bias must be contiguous");

    let mut out = vec![0.0f32; batch * out_channels * time];
    for b in 0..batch {
        for o in 0..out_channels {
            let out_row = &mut out[(b * out_channels + o) * time..][..time];
            out_row.fill(bs[o]);
            for i in 0..in_channels {
                let x_row = &xs[(b * in_channels + i) * time..][..time];
                for k in 0..kernel_size {
                    let w = ws[(o * in_channels + i) * kernel_size + k];
                    let offset = spec.offset(k);
                    if w == 0.0 || offset >= time {
                        continue;
                    }
                    for t in offset..time {
                        out_row[t] += w * x_row[t - offset];
                    }
                }
            }
        }
    }

    let requires_grad = x.requires_grad() || weight.requires_grad() || bias.requires_grad();
    let mut result = Tensor::new(Array1::from(out), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(Conv1dBackward {
            x: x.clone(),
            weight: weight.clone(),
            bias: bias.clone(),
            spec,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct Conv1dBackward {
    x: Tensor,
    weight: Tensor,
    bias: Tensor,
    spec: ConvSpec,
    result_grad: GradCell,
}

impl BackwardOp for Conv1dBackward {
    fn backward(&self) {
        let Some(grad) = self.result_grad.borrow().as_ref().cloned() else {
            return;
        };
        let ConvSpec { batch, in_channels, out_channels, time, kernel_size, .. } = self.spec;
        let gs = grad.as_slice().expect("conv grad must be contiguous");
        let xs = self.x.data().as_slice().expect("conv input must be contiguous");
        let ws = self.weight.data().as_slice().expect("conv weight must be contiguous");

        let mut grad_x = self.x.requires_grad().then(|| vec![0.0f32; xs.len()]);
        let mut grad_w = self.weight.requires_grad().then(|| vec![0.0f32; ws.len()]);
        let mut grad_b = self.bias.requires_grad().then(|| vec![0.0f32; out_channels]);

        for b in 0..batch {
            for o in 0..out_channels {
                let g_row = &gs[(b * out_channels + o) * time..][..time];
                if let Some(gb) = grad_b.as_mut() {
                    gb[o] += g_row.iter().sum::<f32>();
                }
                for i in 0..in_channels {
                    let x_base = (b * in_channels + i) * time;
                    for k in 0..kernel_size {
                        let offset = self.spec.offset(k);
                        if offset >= time {
                            continue;
                        }
                        let w_idx = (o * in_channels + i) * kernel_size + k;
                        if let Some(gw) = grad_w.as_mut() {
                            let x_row = &xs[x_base..x_base + time];
                            let mut acc = 0.0f32;
                            for t in offset..time {
                                acc += g_row[t] * x_row[t - offset];
                            }
                            gw[w_idx] += acc;
                        }
                        if let Some(gx) = grad_x.as_mut() {
                            let w = ws[w_idx];
                            let gx_row = &mut gx[x_base..x_base + time];
                            for t in offset..time {
                                gx_row[t - offset] += w * g_row[t];
                            }
                        }
                    }
                }
            }
        }

        if let Some(gx) = grad_x {
            self.x.accumulate_grad(Array1::from(gx));
        }
        if let Some(gw) = grad_w {
            self.weight.accumulate_grad(Array1::from(gw));
        }
        if let Some(gb) = grad_b {
            self.bias.accumulate_grad(Array1::from(gb));
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone(), self.weight.clone(), self.bias.clone()]
    }
}

/// Select `count` channels starting at `start` from a `[batch, channels, time]` tensor
pub fn slice_channels(
    x: &Tensor,
    batch: usize,
    channels: usize,
    time: usize,
    start: usize,
    count: usize,
) -> Tensor {
    assert_eq!(x.len(), batch * channels * time, "slice_channels: size mismatch");
    assert!(start + count <= channels, "slice_channels: range out of bounds");

    let xs = x.data().as_slice().expect("slice input must be contiguous");
    let mut out = Vec::with_capacity(batch * count * time);
    for b in 0..batch {
        let from = (b * channels + start) * time;
        out.extend_from_slice(&xs[from..from + count * time]);
    }

    let requires_grad = x.requires_grad();
    let mut result = Tensor::new(Array1::from(out), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(SliceChannelsBackward {
            x: x.clone(),
            batch,
            channels,
            time,
            start,
            count,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct SliceChannelsBackward {
    x: Tensor,
    batch: usize,
    channels: usize,
    time: usize,
    start: usize,
    count: usize,
    result_grad: GradCell,
}

impl BackwardOp for SliceChannelsBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                let gs = grad.as_slice().expect("slice grad must be contiguous");
                let mut gx = Array1::zeros(self.x.len());
                let span = self.count * self.time;
                for b in 0..self.batch {
                    let to = (b * self.channels + self.start) * self.time;
                    gx.as_slice_mut()
                        .expect("fresh array is contiguous")[to..to + span]
                        .copy_from_slice(&gs[b * span..(b + 1) * span]);
                }
                self.x.accumulate_grad(gx);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone()]
    }
}
