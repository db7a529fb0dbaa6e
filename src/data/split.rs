//! Deterministic train/test partition

use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Dataset split type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    /// Training split
    Train,
    /// Held-out split
    Test,
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// How many examples go to the test split
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestSize {
    /// Fraction of the dataset, rounded up
    Fraction(f64),
    /// Absolute count
    Count(usize),
}

impl TestSize {
    fn count(self, n: usize) -> Result<usize> {
        let count = match self {
            Self::Fraction(f) if (0.0..1.0).contains(&f) => (f * n as f64).ceil() as usize,
            Self::Fraction(f) => {
                return Err(Error::ConfigError(format!("test_size must be in [0, 1), got {f}")))
            }
            Self::Count(c) => c,
        };
        if count > n {
            return Err(Error::ConfigError(format!(
                "test split of {count} examples exceeds dataset size {n}"
            )));
        }
        Ok(count)
    }
}

/// Indices of `split` within `0..n`.
///
/// The partition is a seeded shuffle: the first `test` positions of the
/// permutation are held out, the rest train. The same `random_state` always
/// yields the same partition, and the two splits are disjoint and cover `0..n`.
pub fn split_indices(
    n: usize,
    test_size: TestSize,
    random_state: u64,
    split: Split,
) -> Result<Vec<usize>> {
    let n_test = test_size.count(n)?;
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(random_state));

    let mut chosen = match split {
        Split::Test => order[..n_test].to_vec(),
        Split::Train => order[n_test..].to_vec(),
    };
    chosen.sort_unstable();
    Ok(chosen)
}
