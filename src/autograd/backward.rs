//! Backward operations and reverse-mode traversal

use super::Tensor;
use ndarray::Array1;
use std::collections::HashSet;

/// Gradient rule of one recorded operation.
///
/// `backward` reads the gradient of the operation's result and accumulates
/// the contributions into its inputs. It must not recurse: the traversal in
/// [`backward`] schedules every op once, after all consumers of its result.
pub trait BackwardOp {
    /// Propagate the result gradient into the inputs
    fn backward(&self);

    /// Tensors this operation read
    fn inputs(&self) -> Vec<Tensor>;
}

/// Perform a backward pass from `tensor`.
///
/// Seeds the output gradient with `grad_output` (ones when absent, which is
/// the right seed for a scalar loss) and runs every reachable backward op in
/// reverse topological order.
pub fn backward(tensor: &mut Tensor, grad_output: Option<Array1<f32>>) {
    let seed = grad_output.unwrap_or_else(|| Array1::ones(tensor.len()));
    tensor.set_grad(seed);

    for node in topological_order(tensor).iter().rev() {
        if let Some(op) = node.backward_op() {
            op.backward();
        }
    }
}

/// Post-order of the graph below `root`: inputs appear before their consumers.
fn topological_order(root: &Tensor) -> Vec<Tensor> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![(root.clone(), false)];

    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if !visited.insert(node.id()) {
            continue;
        }
        let op = node.backward_op();
        stack.push((node, true));
        if let Some(op) = op {
            for input in op.inputs() {
                if input.requires_grad() && !visited.contains(&input.id()) {
                    stack.push((input, false));
                }
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{add, mul, sum};

    #[test]
    fn test_shared_input_receives_each_contribution_once() {
        // y = sum(x * x + x), dy/dx = 2x + 1
        let x = Tensor::from_vec(vec![1.0, -2.0, 3.0], true);
        let sq = mul(&x, &x);
        let mut y = sum(&add(&sq, &x));
        backward(&mut y, None);

        let grad = x.grad().unwrap();
        assert_eq!(grad.to_vec(), vec![3.0, -3.0, 7.0]);
    }

    #[test]
    fn test_diamond_graph() {
        // a -> b = a + a, c = b * a, y = sum(c) = 2a², dy/da = 4a
        let a = Tensor::from_vec(vec![0.5, 2.0], true);
        let b = add(&a, &a);
        let c = mul(&b, &a);
        let mut y = sum(&c);
        backward(&mut y, None);

        assert_eq!(a.grad().unwrap().to_vec(), vec![2.0, 8.0]);
    }

    #[test]
    fn test_frozen_leaf_gets_no_grad() {
        let w = Tensor::from_vec(vec![2.0], false);
        let x = Tensor::from_vec(vec![3.0], true);
        let mut y = sum(&mul(&w, &x));
        backward(&mut y, None);

        assert!(w.grad().is_none());
        assert_eq!(x.grad().unwrap()[0], 2.0);
    }
}
