//! Combined distillation objective

use super::kl::masked_gaussian_kl;
use super::power::PowerLoss;
use crate::autograd::add;
use crate::error::Result;
use crate::model::{FlowOutput, GaussianParams, SignalDims};
use crate::Tensor;
use ndarray::Array2;

/// Density distillation loss for a flow student against a Gaussian teacher
///
/// # Formula
///
/// ```text
/// L = KL(student[t + 1] || teacher[t]) + P(generated, target)
/// ```
///
/// where the KL is averaged over valid aligned pairs and `P` is the
/// two-band magnitude spectrum loss averaged over examples.
#[derive(Debug)]
pub struct DistillationLoss {
    /// Floor applied to the teacher log-scale
    pub log_scale_min: f32,
    power: PowerLoss,
}

/// The total and the terms it is made of
#[derive(Debug, Clone)]
pub struct LossBreakdown {
    pub total: Tensor,
    pub kl: Tensor,
    pub power: Tensor,
}

impl LossBreakdown {
    /// Scalar values `(total, kl, power)`
    pub fn values(&self) -> (f32, f32, f32) {
        (self.total.item(), self.kl.item(), self.power.item())
    }
}

impl DistillationLoss {
    pub fn new(log_scale_min: f32, sample_rate: u32) -> Self {
        Self { log_scale_min, power: PowerLoss::new(sample_rate) }
    }

    pub fn with_power_loss(log_scale_min: f32, power: PowerLoss) -> Self {
        Self { log_scale_min, power }
    }

    /// Compute both terms over a padded batch
    ///
    /// # Arguments
    ///
    /// * `student` - Output of the student's generation pass
    /// * `teacher` - Teacher scores of `student.waveform`
    /// * `target` - Reference waveforms `[batch, time]`
    /// * `lengths` - Valid samples per example
    pub fn forward(
        &self,
        student: &FlowOutput,
        teacher: &GaussianParams,
        target: &Array2<f32>,
        lengths: &[usize],
        dims: SignalDims,
    ) -> Result<LossBreakdown> {
        let kl = masked_gaussian_kl(student, teacher, lengths, dims, self.log_scale_min)?;
        let power = self.power.forward(&student.waveform, target, lengths)?;
        Ok(LossBreakdown { total: add(&kl, &power), kl, power })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use crate::distill::SpectralBand;
    use approx::assert_relative_eq;

    fn tensor(v: &[f32], requires_grad: bool) -> Tensor {
        Tensor::from_vec(v.to_vec(), requires_grad)
    }

    #[test]
    fn test_total_is_sum_of_terms_and_backpropagates() {
        let loss = DistillationLoss::with_power_loss(
            -7.0,
            PowerLoss::with_bands(vec![(
                SpectralBand { n_fft: 8, win_length: 8, hop_length: 2, bins: 0..5 },
                1.0,
            )]),
        );
        let dims = SignalDims::new(1, 6);
        let waveform = tensor(&[0.1, -0.3, 0.5, 0.2, -0.1, 0.4], true);
        let student = FlowOutput {
            waveform: waveform.clone(),
            loc: tensor(&[0.0, 0.1, 0.0, -0.2, 0.1, 0.0], true),
            scale: tensor(&[1.0, 0.9, 1.1, 1.0, 0.8, 1.2], true),
            log_scale: tensor(&[0.0, -0.1, 0.1, 0.0, -0.2, 0.2], true),
        };
        let teacher = GaussianParams {
            loc: tensor(&[0.2; 6], false),
            log_scale: tensor(&[-0.5; 6], false),
        };
        let target = Array2::from_shape_vec((1, 6), vec![0.0, 0.2, 0.4, 0.1, -0.2, 0.3]).unwrap();

        let mut out = loss.forward(&student, &teacher, &target, &[5], dims).unwrap();
        let (total, kl, power) = out.values();
        assert_relative_eq!(total, kl + power, epsilon = 1e-5);
        assert!(kl > 0.0 && power > 0.0);

        backward(&mut out.total, None);
        assert!(waveform.grad().is_some());
        assert!(student.log_scale.grad().is_some());
        assert!(teacher.loc.grad().is_none());
    }
}
