//! Closed-form Gaussian KL between student and teacher predictions
//!
//! ```text
//! KL = 4 (tls - sls)² + ln(ts / ss) + (ss² - ts² + (sl - tl)²) / (2 ts²)
//! ```
//!
//! with `tls = max(teacher_log_scale, log_scale_min)` and `ts = exp(tls)`.
//! The squared log-scale penalty sits on top of the divergence proper.

use super::mask::shifted_mask;
use crate::autograd::{BackwardOp, GradCell};
use crate::model::{FlowOutput, GaussianParams, SignalDims};
use crate::error::{Error, Result};
use crate::Tensor;
use ndarray::{Array1, Array2};
use std::rc::Rc;

/// One position of the KL term
pub fn gaussian_kl(
    student_loc: f32,
    student_scale: f32,
    student_log_scale: f32,
    teacher_loc: f32,
    teacher_log_scale: f32,
    log_scale_min: f32,
) -> f32 {
    let tls = teacher_log_scale.max(log_scale_min);
    let ts2 = (2.0 * tls).exp();
    let diff = student_loc - teacher_loc;
    4.0 * (tls - student_log_scale).powi(2) + tls - student_scale.ln()
        + (student_scale * student_scale - ts2 + diff * diff) / (2.0 * ts2)
}

/// Partial derivatives of [`gaussian_kl`] with respect to its five inputs,
/// in argument order
fn gaussian_kl_grad(
    sl: f32,
    ss: f32,
    sls: f32,
    tl: f32,
    tls_raw: f32,
    log_scale_min: f32,
) -> [f32; 5] {
    let clamped = tls_raw < log_scale_min;
    let tls = tls_raw.max(log_scale_min);
    let ts2 = (2.0 * tls).exp();
    let diff = sl - tl;
    let d = tls - sls;

    let d_sl = diff / ts2;
    let d_ss = -1.0 / ss + ss / ts2;
    let d_sls = -8.0 * d;
    let d_tl = -diff / ts2;
    let d_tls = if clamped { 0.0 } else { 8.0 * d + 1.0 - (ss * ss + diff * diff) / ts2 };
    [d_sl, d_ss, d_sls, d_tl, d_tls]
}

/// Masked mean KL over the aligned pairs (teacher `t`, student `t + 1`).
///
/// Pairs beyond each example's valid length contribute nothing and receive
/// zero gradient; the sum is divided by the number of valid pairs, floored
/// at one.
///
/// Fails with [`Error::Consistency`] when a prediction does not cover
/// `dims` or when there is not one length per example.
pub fn masked_gaussian_kl(
    student: &FlowOutput,
    teacher: &GaussianParams,
    lengths: &[usize],
    dims: SignalDims,
    log_scale_min: f32,
) -> Result<Tensor> {
    let SignalDims { batch, time } = dims;
    let predictions = [
        ("student loc", &student.loc),
        ("student scale", &student.scale),
        ("student log-scale", &student.log_scale),
        ("teacher loc", &teacher.loc),
        ("teacher log-scale", &teacher.log_scale),
    ];
    for (name, t) in predictions {
        if t.len() != dims.len() {
            return Err(Error::Consistency(format!(
                "{name} has {} values, expected {batch} x {time}",
                t.len()
            )));
        }
    }
    if lengths.len() != batch {
        return Err(Error::Consistency(format!(
            "{} lengths for a batch of {batch}",
            lengths.len()
        )));
    }
    let mask = shifted_mask(lengths, time);
    let count = mask.sum().max(1.0);

    let (sl, ss, sls) = (student.loc.data(), student.scale.data(), student.log_scale.data());
    let (tl, tls) = (teacher.loc.data(), teacher.log_scale.data());
    let mut total = 0.0f32;
    for b in 0..batch {
        for t in 0..time.saturating_sub(1) {
            if mask[[b, t]] == 0.0 {
                continue;
            }
            let (s, k) = (b * time + t + 1, b * time + t);
            total += gaussian_kl(sl[s], ss[s], sls[s], tl[k], tls[k], log_scale_min);
        }
    }

    let inputs = [
        student.loc.clone(),
        student.scale.clone(),
        student.log_scale.clone(),
        teacher.loc.clone(),
        teacher.log_scale.clone(),
    ];
    let requires_grad = inputs.iter().any(Tensor::requires_grad);
    let mut result = Tensor::new(Array1::from(vec![total / count]), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(GaussianKlBackward {
            inputs,
            mask,
            count,
            dims,
            log_scale_min,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct GaussianKlBackward {
    /// student loc, scale, log-scale; teacher loc, log-scale
    inputs: [Tensor; 5],
    mask: Array2<f32>,
    count: f32,
    dims: SignalDims,
    log_scale_min: f32,
    result_grad: GradCell,
}

impl BackwardOp for GaussianKlBackward {
    fn backward(&self) {
        let Some(upstream) = self.result_grad.borrow().as_ref().map(|g| g[0]) else {
            return;
        };
        let SignalDims { batch, time } = self.dims;
        let [sl, ss, sls, tl, tls] = &self.inputs;
        let (sl, ss, sls, tl, tls) = (sl.data(), ss.data(), sls.data(), tl.data(), tls.data());

        let mut grads: Vec<Array1<f32>> =
            (0..5).map(|_| Array1::zeros(self.dims.len())).collect();
        let factor = upstream / self.count;
        for b in 0..batch {
            for t in 0..time.saturating_sub(1) {
                if self.mask[[b, t]] == 0.0 {
                    continue;
                }
                let (s, k) = (b * time + t + 1, b * time + t);
                let g = gaussian_kl_grad(sl[s], ss[s], sls[s], tl[k], tls[k], self.log_scale_min);
                grads[0][s] += factor * g[0];
                grads[1][s] += factor * g[1];
                grads[2][s] += factor * g[2];
                grads[3][k] += factor * g[3];
                grads[4][k] += factor * g[4];
            }
        }

        for (input, grad) in self.inputs.iter().zip(grads) {
            if input.requires_grad() {
                input.accumulate_grad(grad);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        self.inputs.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use crate::autograd::tests::test_utils::{finite_difference, max_gradient_error};
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    const LSM: f32 = -7.0;

    fn outputs(values: &[Vec<f32>; 5], requires_grad: bool) -> (FlowOutput, GaussianParams) {
        let t = |v: &Vec<f32>| Tensor::from_vec(v.clone(), requires_grad);
        (
            FlowOutput {
                waveform: t(&values[0]),
                loc: t(&values[0]),
                scale: t(&values[1]),
                log_scale: t(&values[2]),
            },
            GaussianParams { loc: t(&values[3]), log_scale: t(&values[4]) },
        )
    }

    fn loss(values: &[Vec<f32>; 5], lengths: &[usize], dims: SignalDims) -> f32 {
        let (s, t) = outputs(values, false);
        masked_gaussian_kl(&s, &t, lengths, dims, LSM).unwrap().item()
    }

    #[test]
    fn test_identical_aligned_distributions_give_zero() {
        let dims = SignalDims::new(1, 4);
        // student step t + 1 matches teacher step t
        let values = [
            vec![9.0, 0.1, -0.2, 0.3],
            vec![1.0, 0.5f32.exp(), 1.0, 0.2f32.exp()],
            vec![0.0, 0.5, 0.0, 0.2],
            vec![0.1, -0.2, 0.3, 7.0],
            vec![0.5, 0.0, 0.2, 3.0],
        ];
        assert_abs_diff_eq!(loss(&values, &[4], dims), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_clamp_blocks_teacher_log_scale_gradient() {
        let dims = SignalDims::new(1, 2);
        let values =
            [vec![0.0, 0.3], vec![1.0, 1.2], vec![0.0, 0.1], vec![0.2, 0.0], vec![-9.0, 0.0]];
        let (s, t) = outputs(&values, true);
        let mut kl = masked_gaussian_kl(&s, &t, &[2], dims, LSM).unwrap();
        backward(&mut kl, None);

        assert_eq!(t.log_scale.grad().unwrap()[0], 0.0);
        assert!(t.loc.grad().unwrap()[0] != 0.0);
        // the first student step and the last teacher step are never compared
        assert_eq!(s.loc.grad().unwrap()[0], 0.0);
        assert_eq!(t.loc.grad().unwrap()[1], 0.0);
    }

    #[test]
    fn test_empty_mask_gives_zero_loss() {
        let dims = SignalDims::new(2, 3);
        let values = [vec![0.5; 6], vec![2.0; 6], vec![0.1; 6], vec![0.0; 6], vec![0.0; 6]];
        assert_eq!(loss(&values, &[1, 0], dims), 0.0);
    }

    #[test]
    fn test_mismatched_shapes_are_errors() {
        let values = [vec![0.0; 4], vec![1.0; 4], vec![0.0; 4], vec![0.0; 4], vec![0.0; 3]];
        let (s, t) = outputs(&values, false);
        let err = masked_gaussian_kl(&s, &t, &[4], SignalDims::new(1, 4), LSM).unwrap_err();
        assert!(matches!(err, Error::Consistency(ref m) if m.contains("teacher log-scale")));

        let values = [vec![0.0; 4], vec![1.0; 4], vec![0.0; 4], vec![0.0; 4], vec![0.0; 4]];
        let (s, t) = outputs(&values, false);
        let err = masked_gaussian_kl(&s, &t, &[2], SignalDims::new(2, 2), LSM).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_kl_is_non_negative(
            sl in -2.0f32..2.0,
            sls in -3.0f32..1.0,
            tl in -2.0f32..2.0,
            tls in -10.0f32..1.0,
        ) {
            let kl = gaussian_kl(sl, sls.exp(), sls, tl, tls, LSM);
            prop_assert!(kl >= -1e-5, "kl = {kl}");
        }

        #[test]
        fn prop_padding_values_do_not_matter(
            values in prop::collection::vec(-1.0f32..1.0, 5 * 12),
            garbage in prop::collection::vec(-5.0f32..5.0, 5 * 12),
            len0 in 1usize..=6,
            len1 in 1usize..=6,
        ) {
            let dims = SignalDims::new(2, 6);
            let lengths = [len0, len1];
            let build = |src: &[f32]| -> [Vec<f32>; 5] {
                let mut v: [Vec<f32>; 5] =
                    std::array::from_fn(|i| src[i * 12..(i + 1) * 12].to_vec());
                v[1] = v[1].iter().map(|x| x.exp()).collect();
                v
            };
            let clean = build(&values);

            let mut mixed = values.clone();
            for i in 0..5 {
                for b in 0..2 {
                    for t in lengths[b]..6 {
                        mixed[i * 12 + b * 6 + t] = garbage[i * 12 + b * 6 + t];
                    }
                }
            }
            let dirty = build(&mixed);

            let a = loss(&clean, &lengths, dims);
            let b = loss(&dirty, &lengths, dims);
            prop_assert!((a - b).abs() <= 1e-5 * a.abs().max(1.0), "{a} vs {b}");
        }

        #[test]
        fn prop_kl_gradient_check(
            values in prop::collection::vec(-1.0f32..1.0, 5 * 8),
            len0 in 2usize..=4,
        ) {
            let dims = SignalDims::new(2, 4);
            let lengths = [len0, 4];
            let mut base: [Vec<f32>; 5] =
                std::array::from_fn(|i| values[i * 8..(i + 1) * 8].to_vec());
            // keep scales positive and the teacher clamp inactive
            base[1] = base[1].iter().map(|x| 1.0 + 0.5 * x).collect();

            let (s, t) = outputs(&base, true);
            let mut kl = masked_gaussian_kl(&s, &t, &lengths, dims, LSM).unwrap();
            backward(&mut kl, None);
            let analytical = [
                s.loc.grad().unwrap(),
                s.scale.grad().unwrap(),
                s.log_scale.grad().unwrap(),
                t.loc.grad().unwrap(),
                t.log_scale.grad().unwrap(),
            ];

            for (i, grad) in analytical.iter().enumerate() {
                let numerical = finite_difference(
                    |v| {
                        let mut perturbed = base.clone();
                        perturbed[i] = v.to_vec();
                        loss(&perturbed, &lengths, dims)
                    },
                    &base[i],
                    1e-3,
                );
                let err = max_gradient_error(grad.as_slice().unwrap(), &numerical);
                prop_assert!(err < 2e-2, "input {i}: {grad:?} vs {numerical:?}");
            }
        }
    }
}
