//! Server and client errors.

use trellis_build::BuildError;

use crate::protocol::ErrorKind;
use crate::state::ServerState;

/// Errors raised by the compiler server or its clients.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The server port could not be bound.
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// The address.
        addr: String,
        /// Why binding failed.
        reason: String,
    },

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No server answers at the endpoint and it could not be bound either.
    #[error("compiler server at {url} is unreachable: {reason}")]
    Unreachable {
        /// Server URL.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// A malformed message was received.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server reported an error for a request.
    #[error("{message}")]
    Remote {
        /// Category reported by the server.
        kind: ErrorKind,
        /// The message.
        message: String,
    },

    /// A build operation failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The state machine rejected a transition.
    #[error("invalid server state transition {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: ServerState,
        /// Requested state.
        to: ServerState,
    },

    /// The coordinator has shut down.
    #[error("compiler server is stopping")]
    Stopped,
}

impl From<serde_json::Error> for ServerError {
    fn from(e: serde_json::Error) -> Self {
        ServerError::Protocol(e.to_string())
    }
}
