// error.rs — Error types for lensa.

use std::path::PathBuf;

use thiserror::Error;

use crate::descriptor::ArtworkId;

/// The query or reference image could not be turned into descriptors.
///
/// Always recoverable from the user's point of view: retake the photo.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Bytes are not a decodable image.
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// Image file could not be read.
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Image is smaller than the extractor's minimum size.
    #[error("image too small: {width}×{height} (minimum {min}×{min})")]
    TooSmall { width: u32, height: u32, min: u32 },
}

/// Reference corpus storage errors.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode record: {0}")]
    Encode(#[source] bincode::Error),

    #[error("could not decode corpus metadata: {0}")]
    Decode(#[from] serde_json::Error),

    /// A record file exists but does not hold a valid descriptor set.
    #[error("corrupt corpus record {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Storing one artwork failed.
    #[error("could not store artwork {artwork_id}: {source}")]
    Write {
        artwork_id: ArtworkId,
        #[source]
        source: Box<CorpusError>,
    },

    /// The corpus was built with a different extractor configuration.
    #[error("corpus extractor fingerprint {corpus} does not match {engine}")]
    FingerprintMismatch { corpus: String, engine: String },

    /// The corpus directory cannot be created or written.
    #[error("corpus directory {path} is not writable: {source}")]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Why one artwork could not be enrolled during a build.
#[derive(Debug, Error)]
pub enum BuildFailure {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] CorpusError),
}
