//! Error types for cache operations.

use std::path::PathBuf;

/// Errors raised by the source cache and compiler host.
///
/// Reads of persisted entries are fail-safe and never produce these: a
/// corrupt or outdated entry is a cache miss. These errors come from the
/// live filesystem the toolchain reads from and writes to.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing a file.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The file is neither in memory nor on disk.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

impl CacheError {
    /// Wraps an I/O error, mapping `NotFound` to [`CacheError::NotFound`].
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            CacheError::NotFound(path)
        } else {
            CacheError::Io { path, source }
        }
    }
}
