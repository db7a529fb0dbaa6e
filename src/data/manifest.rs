//! Pipe-delimited metadata manifest (`train.txt`)
//!
//! One utterance per line: `audio.npy|features.npy|length|text[|speaker]`.
//! Paths are relative to the data root. Five fields mark a multi-speaker
//! corpus; every line must then carry a speaker id.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// File name of the manifest inside the data root
pub const MANIFEST_FILE: &str = "train.txt";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestEntry {
    pub audio_path: PathBuf,
    pub feature_path: PathBuf,
    /// Waveform length in samples, used for length-aware batching
    pub length: usize,
    pub text: String,
    pub speaker_id: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    pub multi_speaker: bool,
}

impl Manifest {
    /// Read `<data_root>/train.txt`
    pub fn load(data_root: &Path) -> Result<Self> {
        let path = data_root.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::io(format!("reading manifest {}", path.display()), e))?;
        Self::parse(&text, data_root, &path)
    }

    /// Parse manifest text; `source` is only used in error messages
    pub fn parse(text: &str, data_root: &Path, source: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        let mut field_count = None;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let err = |message: String| Error::Manifest {
                path: source.to_path_buf(),
                line: lineno + 1,
                message,
            };

            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() != 4 && fields.len() != 5 {
                return Err(err(format!("expected 4 or 5 fields, found {}", fields.len())));
            }
            match field_count {
                None => field_count = Some(fields.len()),
                Some(n) if n != fields.len() => {
                    return Err(err(format!(
                        "expected {n} fields like the first line, found {}",
                        fields.len()
                    )))
                }
                Some(_) => {}
            }

            let length = fields[2]
                .trim()
                .parse::<usize>()
                .map_err(|e| err(format!("invalid length '{}': {e}", fields[2])))?;
            let speaker_id = match fields.get(4) {
                Some(raw) => Some(
                    raw.trim()
                        .parse::<usize>()
                        .map_err(|e| err(format!("invalid speaker id '{raw}': {e}")))?,
                ),
                None => None,
            };

            entries.push(ManifestEntry {
                audio_path: data_root.join(fields[0].trim()),
                feature_path: data_root.join(fields[1].trim()),
                length,
                text: fields[3].to_string(),
                speaker_id,
            });
        }

        if entries.is_empty() {
            return Err(Error::Manifest {
                path: source.to_path_buf(),
                line: 0,
                message: "manifest has no entries".into(),
            });
        }

        Ok(Self { entries, multi_speaker: field_count == Some(5) })
    }

    /// Keep only one speaker's utterances; the result is single-speaker
    #[must_use]
    pub fn filter_speaker(mut self, speaker_id: usize) -> Self {
        self.entries.retain(|e| e.speaker_id == Some(speaker_id));
        for entry in &mut self.entries {
            entry.speaker_id = None;
        }
        self.multi_speaker = false;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
