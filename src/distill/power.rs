//! Two-resolution magnitude spectrum loss
//!
//! Low frequencies are compared with a long window (fine frequency
//! resolution), high frequencies with a short one (fine time resolution).
//! Per example, each band contributes the frame-averaged squared L2 distance
//! between magnitude spectra; the high band is weighted by 10.

use crate::autograd::{BackwardOp, GradCell};
use crate::error::{Error, Result};
use crate::Tensor;
use ndarray::{Array1, Array2};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::ops::Range;
use std::rc::Rc;
use std::sync::Arc;

/// Boundary between the two bands in Hz
const SPLIT_HZ: f32 = 3000.0;

/// STFT geometry and kept bins of one band
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectralBand {
    pub n_fft: usize,
    pub win_length: usize,
    pub hop_length: usize,
    /// Kept one-sided frequency bins
    pub bins: Range<usize>,
}

impl SpectralBand {
    /// Bins below 3 kHz of a 2048-point STFT (Hann 1200, hop 300)
    pub fn low(sample_rate: u32) -> Self {
        let n_freqs = 2048 / 2 + 1;
        let split = split_bin(sample_rate, n_freqs);
        Self { n_fft: 2048, win_length: 1200, hop_length: 300, bins: 0..split }
    }

    /// Bins above 3 kHz of a 512-point STFT (Hann 512, hop 128)
    pub fn high(sample_rate: u32) -> Self {
        let n_freqs = 512 / 2 + 1;
        let split = split_bin(sample_rate, n_freqs);
        Self { n_fft: 512, win_length: 512, hop_length: 128, bins: split..n_freqs }
    }

    /// Centered frames over `len` samples
    pub fn frames(&self, len: usize) -> usize {
        1 + len / self.hop_length
    }
}

fn split_bin(sample_rate: u32, n_freqs: usize) -> usize {
    let bin = (SPLIT_HZ / (sample_rate as f32 * 0.5) * n_freqs as f32) as usize;
    bin.min(n_freqs)
}

/// Band with its cached transforms and window
struct BandPlan {
    band: SpectralBand,
    weight: f32,
    /// Periodic Hann window centered in `n_fft`
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl BandPlan {
    fn new(band: SpectralBand, weight: f32, planner: &mut FftPlanner<f32>) -> Self {
        let offset = (band.n_fft - band.win_length) / 2;
        let mut window = vec![0.0; band.n_fft];
        for n in 0..band.win_length {
            window[offset + n] = 0.5 - 0.5 * (2.0 * PI * n as f32 / band.win_length as f32).cos();
        }
        Self {
            forward: planner.plan_fft_forward(band.n_fft),
            inverse: planner.plan_fft_inverse(band.n_fft),
            band,
            weight,
            window,
        }
    }

    fn frame(&self, signal: &[f32], f: usize, buffer: &mut [Complex<f32>]) {
        let n_fft = self.band.n_fft;
        let start = (f * self.band.hop_length) as isize - (n_fft / 2) as isize;
        for (j, slot) in buffer.iter_mut().enumerate() {
            let pos = start + j as isize;
            let x = usize::try_from(pos).ok().and_then(|p| signal.get(p)).copied().unwrap_or(0.0);
            *slot = Complex::new(x * self.window[j], 0.0);
        }
        self.forward.process(buffer);
    }

    /// Frame-averaged squared magnitude distance, with its gradient with
    /// respect to `generated` accumulated (scaled by `grad_scale`) into `grad`
    fn loss(&self, generated: &[f32], target: &[f32], mut grad: Option<(&mut [f32], f32)>) -> f32 {
        let n_fft = self.band.n_fft;
        let frames = self.band.frames(generated.len());
        let mut g = vec![Complex::new(0.0, 0.0); n_fft];
        let mut y = vec![Complex::new(0.0, 0.0); n_fft];
        let mut back = vec![Complex::new(0.0, 0.0); n_fft];

        let mut total = 0.0f32;
        for f in 0..frames {
            self.frame(generated, f, &mut g);
            self.frame(target, f, &mut y);
            back.fill(Complex::new(0.0, 0.0));
            for k in self.band.bins.clone() {
                let mag = g[k].norm();
                let diff = mag - y[k].norm();
                total += diff * diff;
                if mag > 0.0 {
                    // d(diff²)/dG = 2 diff G / |G|
                    back[k] = g[k] * (2.0 * diff / mag);
                }
            }

            if let Some((out, scale)) = grad.as_mut() {
                // real input u_j: dL/du_j = Re(sum_k c_k e^{+2πijk/N})
                self.inverse.process(&mut back);
                let start = (f * self.band.hop_length) as isize - (n_fft / 2) as isize;
                let frame_scale = *scale / frames as f32;
                for (j, c) in back.iter().enumerate() {
                    let pos = start + j as isize;
                    if pos >= 0 && (pos as usize) < out.len() {
                        out[pos as usize] += frame_scale * self.window[j] * c.re;
                    }
                }
            }
        }
        total / frames as f32
    }
}

/// Spectral power loss between generated and reference waveforms
pub struct PowerLoss {
    bands: Vec<BandPlan>,
}

impl std::fmt::Debug for PowerLoss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerLoss")
            .field("bands", &self.bands.iter().map(|b| (&b.band, b.weight)).collect::<Vec<_>>())
            .finish()
    }
}

impl PowerLoss {
    /// Low band weighted 1, high band weighted 10
    pub fn new(sample_rate: u32) -> Self {
        Self::with_bands(vec![
            (SpectralBand::low(sample_rate), 1.0),
            (SpectralBand::high(sample_rate), 10.0),
        ])
    }

    pub fn with_bands(bands: Vec<(SpectralBand, f32)>) -> Self {
        let mut planner = FftPlanner::new();
        let bands = bands
            .into_iter()
            .map(|(band, weight)| BandPlan::new(band, weight, &mut planner))
            .collect();
        Self { bands }
    }

    pub fn bands(&self) -> impl Iterator<Item = (&SpectralBand, f32)> {
        self.bands.iter().map(|b| (&b.band, b.weight))
    }

    /// Mean over examples of the weighted band losses.
    ///
    /// `generated` is flat `[batch, time]`, `target` is `[batch, time]`; both
    /// are zeroed beyond each example's valid length before the transform.
    pub fn forward(
        &self,
        generated: &Tensor,
        target: &Array2<f32>,
        lengths: &[usize],
    ) -> Result<Tensor> {
        let (batch, time) = target.dim();
        if generated.len() != batch * time {
            return Err(Error::Consistency(format!(
                "generated waveform has {} samples, target is {batch} x {time}",
                generated.len()
            )));
        }
        if lengths.len() != batch {
            return Err(Error::Consistency(format!(
                "{} lengths for a batch of {batch}",
                lengths.len()
            )));
        }

        let data = generated.data();
        let requires_grad = generated.requires_grad();
        let mut grad = requires_grad.then(|| Array1::<f32>::zeros(batch * time));
        let mut total = 0.0f32;

        let mut g = vec![0.0f32; time];
        let mut y = vec![0.0f32; time];
        for b in 0..batch {
            let valid = lengths[b].min(time);
            g.fill(0.0);
            y.fill(0.0);
            for t in 0..valid {
                g[t] = data[b * time + t];
                y[t] = target[[b, t]];
            }

            let mut example_grad = vec![0.0f32; time];
            for plan in &self.bands {
                let scale = plan.weight / batch as f32;
                let slot = grad.is_some().then_some((example_grad.as_mut_slice(), scale));
                total += plan.weight * plan.loss(&g, &y, slot);
            }
            if let Some(grad) = grad.as_mut() {
                for t in 0..valid {
                    grad[b * time + t] = example_grad[t];
                }
            }
        }

        let mean = total / batch.max(1) as f32;
        let mut result = Tensor::new(Array1::from(vec![mean]), requires_grad);
        if let Some(grad) = grad {
            let backward_op = Rc::new(PowerLossBackward {
                generated: generated.clone(),
                local_grad: grad,
                result_grad: result.grad_cell(),
            });
            result.set_backward_op(backward_op);
        }
        Ok(result)
    }
}

/// The gradient is computed with the loss; backward only scales it
struct PowerLossBackward {
    generated: Tensor,
    local_grad: Array1<f32>,
    result_grad: GradCell,
}

impl BackwardOp for PowerLossBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.generated.requires_grad() {
                self.generated.accumulate_grad(&self.local_grad * grad[0]);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.generated.clone()]
    }
}
