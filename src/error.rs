//! Error types with actionable diagnostics.
//!
//! Every variant that aborts a run carries enough context to fix the problem
//! without reading the source: which model, which field, which file.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for wavedistill operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while preparing data or training.
#[derive(Error, Debug)]
pub enum Error {
    /// Hyperparameters or command-line arguments are invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A model was given conditioning it does not accept, or denied conditioning it requires.
    #[error("{model} model {message}\n  → Check cin_channels / gin_channels against the dataset")]
    Capability { model: &'static str, message: String },

    /// Sizes that must agree do not: waveform against conditioning and hop,
    /// or predictions against the batch they score.
    #[error("Inconsistent sizes: {0}")]
    Consistency(String),

    /// An utterance became empty after silence trimming.
    #[error("Utterance {index} is empty after trimming\n  → Lower silence_threshold")]
    EmptyUtterance { index: usize },

    /// Tensor shapes disagree.
    #[error("Tensor shape mismatch for '{name}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch { name: String, expected: Vec<usize>, actual: Vec<usize> },

    /// A required parameter is absent from a checkpoint.
    #[error("Parameter '{name}' not found in checkpoint {path}")]
    MissingParameter { name: String, path: PathBuf },

    /// Metadata manifest could not be parsed.
    #[error("Invalid manifest {path} line {line}: {message}")]
    Manifest { path: PathBuf, line: usize, message: String },

    /// A `.npy` file could not be decoded.
    #[error("Invalid NPY file {path}: {message}")]
    Npy { path: PathBuf, message: String },

    /// A loader thread exited before delivering its batches.
    #[error("Data loader worker {worker} stopped unexpectedly")]
    LoaderWorker { worker: usize },

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WAV encoding failed.
    #[error("Audio write error: {0}")]
    Audio(#[from] hound::Error),

    /// IO error with context.
    #[error("IO error: {context}\n  Cause: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Whether the error is a configuration problem the user can fix before rerunning.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_)
                | Self::Capability { .. }
                | Self::Manifest { .. }
                | Self::MissingParameter { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io("unspecified", source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_error_names_model() {
        let err = Error::Capability {
            model: "student",
            message: "expects speaker ids, but none were provided".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("student"));
        assert!(msg.contains("gin_channels"));
        assert!(err.is_user_error());
    }

    #[test]
    fn test_io_error_constructor() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io("reading manifest", io_err);

        assert!(matches!(err, Error::Io { .. }));
        assert!(err.to_string().contains("reading manifest"));
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = Error::ShapeMismatch {
            name: "upsample.weight".into(),
            expected: vec![4, 4, 1],
            actual: vec![8, 8, 1],
        };
        let msg = err.to_string();
        assert!(msg.contains("upsample.weight"));
        assert!(msg.contains("[4, 4, 1]"));
    }

    #[test]
    fn test_empty_utterance_is_actionable() {
        let msg = Error::EmptyUtterance { index: 3 }.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains("silence_threshold"));
    }
}
