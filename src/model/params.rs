//! Named, ordered parameter storage
//!
//! Layers hold [`ParamId`]s into a model's [`ParameterSet`]. Registration
//! order is the stable index used by the optimizer, the moving-average
//! shadow and checkpoint optimizer state.

use crate::Tensor;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Index of a parameter in its [`ParameterSet`]
pub type ParamId = usize;

/// Ordered collection of named parameters with their logical shapes
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    names: Vec<String>,
    shapes: Vec<Vec<usize>>,
    tensors: Vec<Tensor>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trainable parameter; `data.len()` must equal the product of `shape`
    pub fn register(
        &mut self,
        name: impl Into<String>,
        shape: Vec<usize>,
        data: Array1<f32>,
    ) -> ParamId {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        self.names.push(name.into());
        self.shapes.push(shape);
        self.tensors.push(Tensor::new(data, true));
        self.tensors.len() - 1
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn name(&self, id: ParamId) -> &str {
        &self.names[id]
    }

    pub fn shape(&self, id: ParamId) -> &[usize] {
        &self.shapes[id]
    }

    pub fn get(&self, id: ParamId) -> &Tensor {
        &self.tensors[id]
    }

    pub fn get_mut(&mut self, id: ParamId) -> &mut Tensor {
        &mut self.tensors[id]
    }

    /// Look a parameter up by name
    pub fn find(&self, name: &str) -> Option<ParamId> {
        self.names.iter().position(|n| n == name)
    }

    /// `(name, shape, tensor)` in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize], &Tensor)> {
        self.names
            .iter()
            .zip(&self.shapes)
            .zip(&self.tensors)
            .map(|((n, s), t)| (n.as_str(), s.as_slice(), t))
    }

    pub fn tensors(&self) -> Vec<&Tensor> {
        self.tensors.iter().collect()
    }

    /// Mutable references for the optimizer, in registration order
    pub fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        self.tensors.iter_mut().collect()
    }

    /// Parameters that still receive gradients
    pub fn trainable_count(&self) -> usize {
        self.tensors.iter().filter(|t| t.requires_grad()).count()
    }

    /// Total number of scalar values
    pub fn num_elements(&self) -> usize {
        self.tensors.iter().map(Tensor::len).sum()
    }

    pub fn freeze(&mut self, id: ParamId) {
        self.tensors[id].set_requires_grad(false);
    }

    pub fn freeze_all(&mut self) {
        for t in &mut self.tensors {
            t.set_requires_grad(false);
        }
    }

    pub fn zero_grad(&self) {
        for t in &self.tensors {
            t.zero_grad();
        }
    }

    /// Independent copy: same names, values and trainability, fresh tensors
    pub fn snapshot(&self) -> Self {
        let tensors = self
            .tensors
            .iter()
            .map(|t| Tensor::new(t.data().clone(), t.requires_grad()))
            .collect();
        Self { names: self.names.clone(), shapes: self.shapes.clone(), tensors }
    }
}

/// Seeded uniform initializer, `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`
pub(crate) struct Initializer {
    rng: StdRng,
}

impl Initializer {
    pub(crate) fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    pub(crate) fn uniform(&mut self, len: usize, fan_in: usize) -> Array1<f32> {
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        Array1::from_shape_fn(len, |_| self.rng.random_range(-bound..bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut params = ParameterSet::new();
        let w = params.register("conv.weight", vec![2, 1, 3], Array1::zeros(6));
        let b = params.register("conv.bias", vec![2], Array1::ones(2));

        assert_eq!(params.len(), 2);
        assert_eq!(params.find("conv.bias"), Some(b));
        assert_eq!(params.shape(w), &[2, 1, 3]);
        assert_eq!(params.num_elements(), 8);
        let names: Vec<_> = params.iter().map(|(n, _, _)| n).collect();
        assert_eq!(names, vec!["conv.weight", "conv.bias"]);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut params = ParameterSet::new();
        let id = params.register("w", vec![1], Array1::from(vec![1.0]));
        params.freeze(id);

        let mut copy = params.snapshot();
        copy.get_mut(id).data_mut()[0] = 5.0;
        assert_eq!(params.get(id).data()[0], 1.0);
        assert!(!copy.get(id).requires_grad());
        assert_ne!(copy.get(id).id(), params.get(id).id());
    }

    #[test]
    fn test_initializer_is_bounded_and_seeded() {
        let a = Initializer::new(3).uniform(100, 16);
        let b = Initializer::new(3).uniform(100, 16);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.abs() <= 0.25));
    }
}
