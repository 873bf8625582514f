//! Command errors and exit codes.

use trellis_build::BuildError;
use trellis_config::ConfigError;
use trellis_server::{ErrorKind, ServerError};

/// Exit code for a failed compilation.
pub const EXIT_COMPILE: i32 = 1;
/// Exit code for workspace or settings problems.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code when no compiler server answers.
pub const EXIT_UNREACHABLE: i32 = 3;
/// Exit code for file system problems.
pub const EXIT_IO: i32 = 4;
/// Exit code for bugs (`EX_SOFTWARE`).
pub const EXIT_INTERNAL: i32 = 70;

/// Errors surfaced by a command.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Workspace or settings could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A build operation failed in this process.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The compiler server failed or reported an error.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Local I/O failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// The underlying error.
        source: std::io::Error,
    },
}

impl CliError {
    /// The process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => EXIT_CONFIG,
            CliError::Build(e) => build_exit_code(e),
            CliError::Server(e) => server_exit_code(e),
            CliError::Io { .. } => EXIT_IO,
        }
    }
}

fn build_exit_code(err: &BuildError) -> i32 {
    match err {
        e if e.is_configuration() => EXIT_CONFIG,
        BuildError::UnknownFile(_) => EXIT_CONFIG,
        BuildError::Internal(_) => EXIT_INTERNAL,
        _ => EXIT_IO,
    }
}

fn server_exit_code(err: &ServerError) -> i32 {
    match err {
        ServerError::Unreachable { .. } => EXIT_UNREACHABLE,
        ServerError::Bind { .. } | ServerError::Io(_) => EXIT_IO,
        ServerError::Build(e) => build_exit_code(e),
        ServerError::Remote { kind, .. } => match kind {
            ErrorKind::Configuration => EXIT_CONFIG,
            ErrorKind::Compile => EXIT_COMPILE,
            ErrorKind::Io => EXIT_IO,
            ErrorKind::Protocol | ErrorKind::Internal => EXIT_INTERNAL,
        },
        ServerError::Protocol(_) | ServerError::InvalidTransition { .. } | ServerError::Stopped => {
            EXIT_INTERNAL
        }
    }
}
