//! Element-wise nonlinearities: exp, tanh, sigmoid, clamp_min

use crate::autograd::{BackwardOp, GradCell, Tensor};
use ndarray::Array1;
use std::rc::Rc;

/// Exponential
pub fn exp(a: &Tensor) -> Tensor {
    let data = a.data().mapv(f32::exp);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ExpBackward {
            a: a.clone(),
            output: result.shared_data(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ExpBackward {
    a: Tensor,
    output: Rc<Array1<f32>>,
    result_grad: GradCell,
}

impl BackwardOp for ExpBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂exp(x)/∂x = exp(x)
                self.a.accumulate_grad(grad * self.output.as_ref());
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Hyperbolic tangent
pub fn tanh(a: &Tensor) -> Tensor {
    let data = a.data().mapv(f32::tanh);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(TanhBackward {
            a: a.clone(),
            output: result.shared_data(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct TanhBackward {
    a: Tensor,
    output: Rc<Array1<f32>>,
    result_grad: GradCell,
}

impl BackwardOp for TanhBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂tanh(x)/∂x = 1 - tanh²(x)
                let local = self.output.mapv(|y| 1.0 - y * y);
                self.a.accumulate_grad(grad * &local);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Logistic sigmoid
pub fn sigmoid(a: &Tensor) -> Tensor {
    let data = a.data().mapv(|x| 1.0 / (1.0 + (-x).exp()));
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(SigmoidBackward {
            a: a.clone(),
            output: result.shared_data(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct SigmoidBackward {
    a: Tensor,
    output: Rc<Array1<f32>>,
    result_grad: GradCell,
}

impl BackwardOp for SigmoidBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // σ'(x) = σ(x)(1 - σ(x))
                let local = self.output.mapv(|y| y * (1.0 - y));
                self.a.accumulate_grad(grad * &local);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Clamp from below: `max(x, min)`.
///
/// The gradient passes where `x >= min` and is zero where the floor is active.
pub fn clamp_min(a: &Tensor, min: f32) -> Tensor {
    let data = a.data().mapv(|x| x.max(min));
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ClampMinBackward {
            a: a.clone(),
            min,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ClampMinBackward {
    a: Tensor,
    min: f32,
    result_grad: GradCell,
}

impl BackwardOp for ClampMinBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let pass = self.a.data().mapv(|x| if x >= self.min { 1.0 } else { 0.0 });
                self.a.accumulate_grad(grad * &pass);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{backward, sum};
    use approx::assert_relative_eq;

    #[test]
    fn test_exp_forward_backward() {
        let a = Tensor::from_vec(vec![0.0, 1.0], true);
        let mut y = sum(&exp(&a));
        backward(&mut y, None);

        let grad = a.grad().unwrap();
        assert_relative_eq!(grad[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(grad[1], std::f32::consts::E, epsilon = 1e-5);
    }

    #[test]
    fn test_tanh_saturates() {
        let a = Tensor::from_vec(vec![20.0], true);
        let mut y = sum(&tanh(&a));
        backward(&mut y, None);
        assert_relative_eq!(y.item(), 1.0, epsilon = 1e-6);
        assert!(a.grad().unwrap()[0].abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid_midpoint() {
        let a = Tensor::from_vec(vec![0.0, -30.0], true);
        let y = sigmoid(&a);
        assert_relative_eq!(y.data()[0], 0.5, epsilon = 1e-6);
        assert!(y.data()[1] < 1e-6);

        let mut total = sum(&y);
        backward(&mut total, None);
        assert_relative_eq!(a.grad().unwrap()[0], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_clamp_min_blocks_gradient_below_floor() {
        let a = Tensor::from_vec(vec![-10.0, -7.0, 0.5], true);
        let c = clamp_min(&a, -7.0);
        assert_eq!(c.data().to_vec(), vec![-7.0, -7.0, 0.5]);

        let mut y = sum(&c);
        backward(&mut y, None);
        assert_eq!(a.grad().unwrap().to_vec(), vec![0.0, 1.0, 1.0]);
    }
}
