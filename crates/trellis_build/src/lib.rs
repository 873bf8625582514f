//! The build pipeline.
//!
//! A [`BuildSession`] owns everything one workspace build needs between
//! passes: the resolved context, the source cache, the toolchain, and the
//! last manifest. Each call to [`BuildSession::run`] performs one
//! incremental pass and reports a [`BuildOutcome`]. Progress and compile
//! logs are appended to a shared [`EventLog`] that the compiler server
//! streams to its clients.

#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod output;
pub mod pipeline;
pub mod toolchain;

pub use error::{BuildError, CompileError};
pub use events::{EventKind, EventLog, EventPayload, EventRecord, Subscriber};
pub use output::{compiler_fingerprint, prepare_compiler, CompilerState};
pub use pipeline::{generate_manifest, BuildOutcome, BuildSession, BuildStatus, ExecTarget};
pub use toolchain::{
    parse_diagnostics, toolchain_for, CommandToolchain, CompileUnit, PassthroughToolchain,
    Toolchain,
};
