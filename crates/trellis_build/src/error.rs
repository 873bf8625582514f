//! Error types for the build pipeline.

use std::path::PathBuf;

use trellis_cache::CacheError;
use trellis_common::InternalError;
use trellis_config::ConfigError;
use trellis_diagnostics::Diagnostic;
use trellis_manifest::ManifestError;

/// Failure to compile a single file.
///
/// Never fatal to a pass: the file is recorded as failed and retried on the
/// next build.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The toolchain reported problems in the source.
    #[error("{} diagnostic(s) reported", .0.len())]
    Diagnostics(Vec<Diagnostic>),

    /// Reading the source or writing the output failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The toolchain itself could not run.
    #[error("toolchain failed: {message}")]
    Toolchain {
        /// What went wrong.
        message: String,
    },
}

impl CompileError {
    /// Converts the error into diagnostics attributed to `file`.
    pub fn into_diagnostics(self, file: &std::path::Path) -> Vec<Diagnostic> {
        match self {
            CompileError::Diagnostics(diags) if !diags.is_empty() => diags,
            CompileError::Diagnostics(_) => {
                vec![Diagnostic::error("compilation failed").at(file, None, None)]
            }
            other => vec![Diagnostic::error(other.to_string()).at(file, None, None)],
        }
    }
}

/// Errors that abort a build pass.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Workspace or settings could not be resolved.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// The manifest could not be built or written.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The cache could not be read or written.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An output folder operation failed.
    #[error("build I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The requested file is not part of any module.
    #[error("{} is not part of the build", .0.display())]
    UnknownFile(PathBuf),

    /// A bug in Trellis.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl BuildError {
    /// Returns `true` for configuration problems the user has to fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BuildError::Configuration(_) | BuildError::Manifest(ManifestError::Config(_))
        )
    }
}
