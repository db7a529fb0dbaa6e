//! Corpus loading and batch construction
//!
//! Manifest → dataset (split, speaker filter, `.npy` loading) → length-grouped
//! order → collated [`Batch`]es built on loader threads.

mod audio;
mod batch;
mod collate;
mod dataset;
mod loader;
mod manifest;
mod npy;
mod sampler;
mod split;
mod utterance;

pub use audio::{ensure_divisible, inv_mulaw, inv_mulaw_quantize, AudioFrontEnd, ThresholdFrontEnd};
pub use batch::Batch;
pub use collate::Collator;
pub use dataset::{DatasetOptions, FileDataset, InMemoryDataset, UtteranceSource};
pub use loader::{BatchStream, DataLoader, Ordering};
pub use manifest::{Manifest, ManifestEntry, MANIFEST_FILE};
pub use npy::{load_npy_f32, write_npy_f32, NpyArray};
pub use sampler::LengthGroupedSampler;
pub use split::{split_indices, Split, TestSize};
pub use utterance::Utterance;
