//! Shared foundational types used across the Trellis build orchestrator.
//!
//! This crate provides content hashing for change detection and the internal
//! error type that marks bugs in Trellis itself rather than user problems.

#![warn(missing_docs)]

pub mod hash;
pub mod result;

pub use hash::{ContentHash, ContentHasher, ParseHashError};
pub use result::{InternalError, TrellisResult};

/// Version of the Trellis toolchain, recorded in cache entries and the
/// compiler fingerprint so that upgrades invalidate stale state.
pub const TRELLIS_VERSION: &str = env!("CARGO_PKG_VERSION");
