//! Length-aware batch ordering
//!
//! Examples are sorted by length, shuffled within groups of similar length,
//! and emitted as whole batches in shuffled order, so each batch pads little
//! while epochs still differ.

use crate::error::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;

/// Partially randomized ordering of similar-length examples
#[derive(Debug, Clone)]
pub struct LengthGroupedSampler {
    sorted_indices: Vec<usize>,
    batch_size: usize,
    group_size: usize,
    permute_batches: bool,
}

impl LengthGroupedSampler {
    /// Sampler with the default group size `min(32 * batch_size, n)`,
    /// truncated to a multiple of the batch size
    pub fn new(lengths: &[usize], batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::ConfigError("batch_size must be positive".into()));
        }
        let group_size = (batch_size * 32).min(lengths.len());
        let group_size = group_size - group_size % batch_size;
        Ok(Self::build(lengths, batch_size, group_size))
    }

    /// Sampler with an explicit group size, which must be a positive multiple of the batch size
    pub fn with_group_size(
        lengths: &[usize],
        batch_size: usize,
        group_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 || group_size == 0 || group_size % batch_size != 0 {
            return Err(Error::ConfigError(format!(
                "group size {group_size} must be a positive multiple of batch size {batch_size}"
            )));
        }
        Ok(Self::build(lengths, batch_size, group_size))
    }

    fn build(lengths: &[usize], batch_size: usize, group_size: usize) -> Self {
        let mut sorted_indices: Vec<usize> = (0..lengths.len()).collect();
        sorted_indices.sort_by_key(|&i| lengths[i]);
        Self { sorted_indices, batch_size, group_size, permute_batches: true }
    }

    /// Keep batches in ascending length order
    #[must_use]
    pub fn without_batch_permutation(mut self) -> Self {
        self.permute_batches = false;
        self
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn len(&self) -> usize {
        self.sorted_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted_indices.is_empty()
    }

    /// One pass over every example, freshly randomized
    pub fn order<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        let mut indices = self.sorted_indices.clone();
        let n = indices.len();
        let grouped = if self.group_size == 0 { 0 } else { n / self.group_size * self.group_size };

        if self.group_size > 0 {
            for group in indices[..grouped].chunks_mut(self.group_size) {
                group.shuffle(rng);
            }
        }

        if self.permute_batches && grouped > 0 {
            let mut batches: Vec<&[usize]> = indices[..grouped].chunks(self.batch_size).collect();
            batches.shuffle(rng);
            let permuted: Vec<usize> = batches.concat();
            indices[..grouped].copy_from_slice(&permuted);
        }

        indices[grouped..].shuffle(rng);
        indices
    }
}
