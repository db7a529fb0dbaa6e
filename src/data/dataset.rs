//! Utterance sources: `.npy` files named by a manifest, or in-memory lists

use super::manifest::{Manifest, ManifestEntry};
use super::npy::load_npy_f32;
use super::split::{split_indices, Split, TestSize};
use super::utterance::Utterance;
use crate::error::{Error, Result};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::Path;

/// Random-access collection of utterances.
///
/// Sources are shared with loader worker threads, so they must be `Send + Sync`.
pub trait UtteranceSource: Send + Sync {
    /// Number of utterances
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-utterance lengths used for length-aware ordering
    fn lengths(&self) -> Vec<usize>;

    /// Load one utterance
    fn get(&self, index: usize) -> Result<Utterance>;

    /// Whether utterances carry speaker ids
    fn multi_speaker(&self) -> bool;
}

/// Options for opening a manifest-backed dataset
#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub split: Split,
    pub test_size: TestSize,
    pub random_state: u64,
    /// Keep only this speaker's utterances
    pub speaker_id: Option<usize>,
    /// Load feature files alongside waveforms
    pub local_conditioning: bool,
}

/// Dataset reading `.npy` waveform and feature files listed in `train.txt`
#[derive(Debug, Clone)]
pub struct FileDataset {
    entries: Vec<ManifestEntry>,
    multi_speaker: bool,
    local_conditioning: bool,
}

impl FileDataset {
    /// Open one split of the corpus under `data_root`
    pub fn open(data_root: &Path, options: &DatasetOptions) -> Result<Self> {
        let mut manifest = Manifest::load(data_root)?;
        if let Some(speaker) = options.speaker_id {
            if !manifest.multi_speaker {
                return Err(Error::ConfigError(format!(
                    "speaker id {speaker} requested but the manifest has no speaker column"
                )));
            }
            manifest = manifest.filter_speaker(speaker);
            if manifest.is_empty() {
                return Err(Error::ConfigError(format!("no utterances for speaker {speaker}")));
            }
        }
        Self::from_manifest(manifest, options)
    }

    /// Select one split of an already parsed manifest
    pub fn from_manifest(manifest: Manifest, options: &DatasetOptions) -> Result<Self> {
        let indices =
            split_indices(manifest.len(), options.test_size, options.random_state, options.split)?;
        let mut entries = manifest.entries;
        let entries = indices.into_iter().map(|i| std::mem::take(&mut entries[i])).collect();
        Ok(Self {
            entries,
            multi_speaker: manifest.multi_speaker,
            local_conditioning: options.local_conditioning,
        })
    }

    /// Utterance count per speaker
    pub fn speaker_counts(&self) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for speaker in self.entries.iter().filter_map(|e| e.speaker_id) {
            *counts.entry(speaker).or_insert(0) += 1;
        }
        counts
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }
}

impl UtteranceSource for FileDataset {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn lengths(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.length).collect()
    }

    fn get(&self, index: usize) -> Result<Utterance> {
        let entry = &self.entries[index];
        let audio = load_npy_f32(&entry.audio_path)?;
        let conditioning = if self.local_conditioning {
            let feats = load_npy_f32(&entry.feature_path)?;
            let (frames, dim) = match feats.shape.as_slice() {
                [frames, dim] => (*frames, *dim),
                [frames] => (*frames, 1),
                other => {
                    return Err(Error::Npy {
                        path: entry.feature_path.clone(),
                        message: format!("expected 2-D features, got shape {other:?}"),
                    })
                }
            };
            let array = Array2::from_shape_vec((frames, dim), feats.data).map_err(|e| Error::Npy {
                path: entry.feature_path.clone(),
                message: e.to_string(),
            })?;
            Some(array)
        } else {
            None
        };

        Ok(Utterance {
            waveform: audio.data,
            conditioning,
            speaker_id: if self.multi_speaker { entry.speaker_id } else { None },
        })
    }

    fn multi_speaker(&self) -> bool {
        self.multi_speaker
    }
}

/// Utterances held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    utterances: Vec<Utterance>,
}

impl InMemoryDataset {
    pub fn new(utterances: Vec<Utterance>) -> Self {
        Self { utterances }
    }
}

impl UtteranceSource for InMemoryDataset {
    fn len(&self) -> usize {
        self.utterances.len()
    }

    fn lengths(&self) -> Vec<usize> {
        self.utterances.iter().map(Utterance::len).collect()
    }

    fn get(&self, index: usize) -> Result<Utterance> {
        Ok(self.utterances[index].clone())
    }

    fn multi_speaker(&self) -> bool {
        self.utterances.iter().any(|u| u.speaker_id.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::npy::write_npy_f32;
    use tempfile::tempdir;

    fn write_corpus(root: &Path, speakers: bool) {
        let mut manifest = String::new();
        for i in 0..4 {
            let audio: Vec<f32> = (0..(i + 1) * 8).map(|t| t as f32 / 100.0).collect();
            write_npy_f32(&root.join(format!("a{i}.npy")), &audio, &[audio.len()]).unwrap();
            let feats = vec![0.5f32; (i + 1) * 2 * 3];
            write_npy_f32(&root.join(format!("m{i}.npy")), &feats, &[(i + 1) * 2, 3]).unwrap();
            manifest.push_str(&format!("a{i}.npy|m{i}.npy|{}|text", audio.len()));
            if speakers {
                manifest.push_str(&format!("|{}", i % 2));
            }
            manifest.push('\n');
        }
        std::fs::write(root.join("train.txt"), manifest).unwrap();
    }

    fn options(split: Split) -> DatasetOptions {
        DatasetOptions {
            split,
            test_size: TestSize::Count(1),
            random_state: 1234,
            speaker_id: None,
            local_conditioning: true,
        }
    }

    #[test]
    fn test_open_loads_waveform_and_features() {
        let dir = tempdir().unwrap();
        write_corpus(dir.path(), false);

        let train = FileDataset::open(dir.path(), &options(Split::Train)).unwrap();
        let test = FileDataset::open(dir.path(), &options(Split::Test)).unwrap();
        assert_eq!(train.len(), 3);
        assert_eq!(test.len(), 1);

        let utt = test.get(0).unwrap();
        assert_eq!(utt.len(), test.lengths()[0]);
        assert_eq!(utt.conditioning.as_ref().unwrap().ncols(), 3);
        assert_eq!(utt.frames() * 4, utt.len());
        assert!(utt.speaker_id.is_none());
    }

    #[test]
    fn test_speaker_filter() {
        let dir = tempdir().unwrap();
        write_corpus(dir.path(), true);

        let mut opts = options(Split::Train);
        let all = FileDataset::open(dir.path(), &opts).unwrap();
        assert!(all.multi_speaker());
        assert_eq!(all.speaker_counts().values().sum::<usize>(), 3);
        assert!(all.get(0).unwrap().speaker_id.is_some());

        opts.speaker_id = Some(1);
        opts.test_size = TestSize::Count(0);
        let one = FileDataset::open(dir.path(), &opts).unwrap();
        assert!(!one.multi_speaker());
        assert_eq!(one.len(), 2);
        assert!(one.get(0).unwrap().speaker_id.is_none());
    }

    #[test]
    fn test_speaker_filter_without_speakers_is_config_error() {
        let dir = tempdir().unwrap();
        write_corpus(dir.path(), false);
        let mut opts = options(Split::Train);
        opts.speaker_id = Some(0);
        assert!(matches!(FileDataset::open(dir.path(), &opts), Err(Error::ConfigError(_))));
    }
}
