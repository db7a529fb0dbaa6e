//! Tensor with gradient tracking

use super::BackwardOp;
use ndarray::Array1;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_TENSOR_ID: AtomicUsize = AtomicUsize::new(0);

/// Shared gradient slot of a tensor
pub type GradCell = Rc<RefCell<Option<Array1<f32>>>>;

/// Flat `f32` tensor participating in the autograd tape.
///
/// Clones are cheap: data, gradient slot and backward op are reference
/// counted, and a clone keeps the identity (`id`) of its source. Mutating the
/// data through [`Tensor::data_mut`] copies it first if a computation graph
/// still holds a reference, so recorded graphs always see the values they
/// were built from.
#[derive(Clone)]
pub struct Tensor {
    id: usize,
    data: Rc<Array1<f32>>,
    grad: GradCell,
    backward_op: Option<Rc<dyn BackwardOp>>,
    requires_grad: bool,
}

impl Tensor {
    /// Create a tensor from an array
    pub fn new(data: Array1<f32>, requires_grad: bool) -> Self {
        Self {
            id: NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed),
            data: Rc::new(data),
            grad: Rc::new(RefCell::new(None)),
            backward_op: None,
            requires_grad,
        }
    }

    /// Create a tensor from a vector
    pub fn from_vec(data: Vec<f32>, requires_grad: bool) -> Self {
        Self::new(Array1::from(data), requires_grad)
    }

    /// Create a zero-filled tensor
    pub fn zeros(len: usize, requires_grad: bool) -> Self {
        Self::new(Array1::zeros(len), requires_grad)
    }

    /// Identity shared by all clones of this tensor
    pub fn id(&self) -> usize {
        self.id
    }

    /// Underlying values
    pub fn data(&self) -> &Array1<f32> {
        &self.data
    }

    /// Mutable access to the values (copy-on-write)
    pub fn data_mut(&mut self) -> &mut Array1<f32> {
        Rc::make_mut(&mut self.data)
    }

    pub(crate) fn shared_data(&self) -> Rc<Array1<f32>> {
        Rc::clone(&self.data)
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor has no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// First element, for scalar results such as losses
    pub fn item(&self) -> f32 {
        self.data[0]
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Freeze or unfreeze the tensor
    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        self.requires_grad = requires_grad;
        if !requires_grad {
            self.zero_grad();
        }
    }

    /// Copy of the accumulated gradient
    pub fn grad(&self) -> Option<Array1<f32>> {
        self.grad.borrow().clone()
    }

    /// Overwrite the gradient
    pub fn set_grad(&self, grad: Array1<f32>) {
        *self.grad.borrow_mut() = Some(grad);
    }

    /// Add to the gradient, initialising it on first use
    pub fn accumulate_grad(&self, grad: Array1<f32>) {
        let mut slot = self.grad.borrow_mut();
        match slot.as_mut() {
            Some(existing) => *existing += &grad,
            None => *slot = Some(grad),
        }
    }

    /// Clear the gradient
    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    /// Shared gradient slot, captured by backward ops of results
    pub fn grad_cell(&self) -> GradCell {
        Rc::clone(&self.grad)
    }

    pub fn set_backward_op(&mut self, op: Rc<dyn BackwardOp>) {
        self.backward_op = Some(op);
    }

    pub fn backward_op(&self) -> Option<Rc<dyn BackwardOp>> {
        self.backward_op.clone()
    }

    /// Same values, cut from the graph
    pub fn detach(&self) -> Self {
        Self::new(self.data.as_ref().clone(), false)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("requires_grad", &self.requires_grad)
            .field("has_grad", &self.grad.borrow().is_some())
            .field("has_backward_op", &self.backward_op.is_some())
            .finish()
    }
}
