//! Incremental source cache and the compiler host seam.
//!
//! [`SourceCache`] mediates every read and write the toolchain performs. It
//! keeps an in-memory copy of sources and outputs, records the content hash
//! of the raw source each output was compiled from, and persists those
//! records as [`CacheEntry`] artifacts so a restarted server can still tell
//! which files are stale.

#![warn(missing_docs)]

pub mod artifact;
pub mod error;
pub mod hasher;
pub mod host;
pub mod preprocess;
pub mod retry;

pub use artifact::{encode_path_key, ArtifactStore, CacheEntry};
pub use error::CacheError;
pub use hasher::{ChangeSet, SourceHasher};
pub use host::{is_source_path, normalize_path, CompilerHost, SourceCache};
pub use preprocess::{
    preprocessor_for, IdentityPreprocessor, LogMarkerPreprocessor, Preprocessor,
};
pub use retry::{is_transient, retry_once};
