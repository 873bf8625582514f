//! Compile diagnostics reported by the toolchain, and their rendering.
//!
//! Diagnostics carry a severity, a message and an optional file/line/column
//! location. [`TerminalRenderer`] formats them for standard error.

#![warn(missing_docs)]

pub mod diagnostic;
pub mod renderer;
pub mod severity;

pub use diagnostic::{Diagnostic, Location};
pub use renderer::{DiagnosticRenderer, TerminalRenderer};
pub use severity::Severity;
