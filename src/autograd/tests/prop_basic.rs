//! Property-based tests for element-wise operations (add, mul, scale, exp, tanh)

use super::test_utils::{finite_difference, max_gradient_error};
use crate::autograd::{add, backward, exp, mul, scale, sum, tanh, Tensor};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_mul_add_backward_gradient_check(
        xy in prop::collection::vec((-5.0f32..5.0, -5.0f32..5.0), 2..20)
    ) {
        let (x, y): (Vec<f32>, Vec<f32>) = xy.into_iter().unzip();

        // f(x) = sum(x * y + x)
        let a = Tensor::from_vec(x.clone(), true);
        let b = Tensor::from_vec(y.clone(), false);
        let mut out = sum(&add(&mul(&a, &b), &a));
        backward(&mut out, None);

        let analytical = a.grad().expect("gradient should be available");
        let numerical = finite_difference(
            |x_val| {
                let t_a = Tensor::from_vec(x_val.to_vec(), false);
                let t_b = Tensor::from_vec(y.clone(), false);
                sum(&add(&mul(&t_a, &t_b), &t_a)).item()
            },
            &x,
            1e-2,
        );

        let err = max_gradient_error(analytical.as_slice().unwrap(), &numerical);
        prop_assert!(err < 1e-2, "gradient mismatch: {:?} vs {:?}", analytical, numerical);
    }

    #[test]
    fn prop_exp_backward_gradient_check(
        x in prop::collection::vec(-2.0f32..2.0, 1..8)
    ) {
        let a = Tensor::from_vec(x.clone(), true);
        let mut out = sum(&exp(&a));
        backward(&mut out, None);

        let analytical = a.grad().expect("gradient should be available");
        let numerical = finite_difference(
            |x_val| sum(&exp(&Tensor::from_vec(x_val.to_vec(), false))).item(),
            &x,
            1e-3,
        );

        let err = max_gradient_error(analytical.as_slice().unwrap(), &numerical);
        prop_assert!(err < 2e-2, "gradient mismatch: {:?} vs {:?}", analytical, numerical);
    }

    #[test]
    fn prop_tanh_scale_backward_gradient_check(
        x in prop::collection::vec(-3.0f32..3.0, 1..20),
        factor in -2.0f32..2.0,
    ) {
        let a = Tensor::from_vec(x.clone(), true);
        let mut out = sum(&scale(&tanh(&a), factor));
        backward(&mut out, None);

        let analytical = a.grad().expect("gradient should be available");
        let numerical = finite_difference(
            |x_val| sum(&scale(&tanh(&Tensor::from_vec(x_val.to_vec(), false)), factor)).item(),
            &x,
            1e-3,
        );

        let err = max_gradient_error(analytical.as_slice().unwrap(), &numerical);
        prop_assert!(err < 2e-2, "gradient mismatch: {:?} vs {:?}", analytical, numerical);
    }
}
