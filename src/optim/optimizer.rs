//! Optimizer trait

use crate::Tensor;

/// Trait for optimization algorithms
///
/// Parameters are passed by reference in a stable order; the position of a
/// parameter in the slice is its index into per-parameter optimizer state.
/// Parameters that do not require gradients keep their slot but are skipped.
pub trait Optimizer {
    /// Perform one update on the referenced parameters
    fn step_refs(&mut self, params: &mut [&mut Tensor]);

    /// Zero gradients on referenced parameters
    fn zero_grad_refs(&mut self, params: &mut [&mut Tensor]) {
        for param in params.iter_mut() {
            param.zero_grad();
        }
    }

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    /// Plain gradient descent, enough to exercise the default methods
    struct Descent {
        learning_rate: f32,
    }

    impl Optimizer for Descent {
        fn step_refs(&mut self, params: &mut [&mut Tensor]) {
            for param in params.iter_mut() {
                if let Some(grad) = param.grad() {
                    let update = grad * self.learning_rate;
                    *param.data_mut() -= &update;
                }
            }
        }

        fn lr(&self) -> f32 {
            self.learning_rate
        }

        fn set_lr(&mut self, lr: f32) {
            self.learning_rate = lr;
        }
    }

    #[test]
    fn test_zero_grad_refs_clears_every_parameter() {
        let mut opt = Descent { learning_rate: 0.1 };
        let mut p1 = Tensor::from_vec(vec![1.0, 2.0], true);
        let mut p2 = Tensor::from_vec(vec![3.0], true);
        p1.set_grad(arr1(&[0.5, 1.0]));
        p2.set_grad(arr1(&[1.5]));

        opt.step_refs(&mut [&mut p1, &mut p2]);
        assert!((p1.data()[0] - 0.95).abs() < 1e-6);
        assert!((p2.data()[0] - 2.85).abs() < 1e-6);

        opt.zero_grad_refs(&mut [&mut p1, &mut p2]);
        assert!(p1.grad().is_none());
        assert!(p2.grad().is_none());
    }

    #[test]
    fn test_set_lr() {
        let mut opt = Descent { learning_rate: 0.1 };
        opt.set_lr(0.01);
        assert_eq!(opt.lr(), 0.01);
    }
}
