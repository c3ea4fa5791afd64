use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn a file on disk into a normalized grayscale array.
///
/// Callers treat this as a hard skip of the affected image, never as a
/// zero-similarity match.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Problems that must be caught before any matching starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Fingerprint bit width mismatch: expected {expected}, found {found} ({id})")]
    BitWidthMismatch {
        expected: usize,
        found: usize,
        id: String,
    },

    #[error("Bit width {0} is not a perfect square of at least 4")]
    InvalidBitWidth(usize),

    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error("batch_size must be at least 1")]
    InvalidBatchSize,

    #[error("ssim_threshold {0} is outside [0, 1]")]
    InvalidSsimThreshold(String),

    #[error("Reference corpus is empty")]
    EmptyReference,

    #[error("Invalid fingerprint encoding: {0}")]
    InvalidFingerprint(String),
}

/// Errors raised while reading or writing JSON-Lines tables.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed entry on line {line} of {path}: {source}")]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
