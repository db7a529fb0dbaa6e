//! Exponential moving average of trainable parameters

use crate::Tensor;
use ndarray::{Array1, Zip};
use std::collections::BTreeMap;

/// Lagging copies of trainable parameters, keyed by parameter index.
///
/// Only parameters that require gradients at registration time are shadowed;
/// frozen parameters keep their own values in averaged snapshots.
#[derive(Debug, Clone)]
pub struct ExponentialMovingAverage {
    decay: f32,
    shadow: BTreeMap<usize, Array1<f32>>,
}

impl ExponentialMovingAverage {
    /// Start a shadow from the current parameter values
    pub fn new(decay: f32, params: &[&Tensor]) -> Self {
        let shadow = params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.requires_grad())
            .map(|(i, p)| (i, p.data().clone()))
            .collect();
        Self { decay, shadow }
    }

    pub fn decay(&self) -> f32 {
        self.decay
    }

    /// Number of shadowed parameters
    pub fn len(&self) -> usize {
        self.shadow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shadow.is_empty()
    }

    /// Shadow value for the parameter at `index`
    pub fn get(&self, index: usize) -> Option<&Array1<f32>> {
        self.shadow.get(&index)
    }

    /// `shadow -= (1 - decay) * (shadow - value)` for every shadowed parameter
    pub fn update(&mut self, params: &[&Tensor]) {
        let rate = 1.0 - self.decay;
        for (index, shadow) in &mut self.shadow {
            if let Some(param) = params.get(*index) {
                Zip::from(shadow).and(param.data()).for_each(|s, &v| *s -= rate * (*s - v));
            }
        }
    }

    /// Overwrite shadowed entries of `params` with their averaged values
    pub fn copy_to(&self, params: &mut [&mut Tensor]) {
        for (index, shadow) in &self.shadow {
            if let Some(param) = params.get_mut(*index) {
                if param.len() == shadow.len() {
                    param.data_mut().assign(shadow);
                }
            }
        }
    }
}
