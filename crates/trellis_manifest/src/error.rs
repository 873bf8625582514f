//! Error types for manifest construction and persistence.

use std::path::PathBuf;

use trellis_cache::CacheError;
use trellis_config::ConfigError;

/// Errors raised while building, loading, or writing a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The target module or workspace configuration could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Hashing a file failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An I/O error occurred while scanning or writing.
    #[error("manifest I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A persisted manifest is malformed.
    #[error("invalid manifest {}: {reason}", path.display())]
    Invalid {
        /// The manifest file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// A manifest could not be serialized.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}
