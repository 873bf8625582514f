//! Wire messages.
//!
//! One JSON object per line in both directions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use trellis_build::{BuildError, BuildOutcome, EventKind, EventRecord, ExecTarget};

use crate::error::ServerError;
use crate::state::ServerState;

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    /// Run one pass and return its outcome.
    Build,
    /// Enable watch mode and stream every event.
    #[serde(alias = "start")]
    Watch,
    /// Finish the current pass and exit.
    Stop,
    /// Drop in-memory state after the current pass.
    Restart,
    /// Report server state.
    Info,
    /// Stream events of one kind.
    Event {
        /// The kind to stream.
        kind: EventKind,
    },
    /// Build, then report what running `file` means.
    Exec {
        /// Source file to run.
        file: PathBuf,
    },
    /// Write the manifest.
    Manifest {
        /// Strip development-only modules and files.
        #[serde(default)]
        prod: bool,
        /// Destination; defaults to the tool folder.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<PathBuf>,
    },
}

/// Category of a failed request, used to choose the client's exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Workspace or settings problem.
    Configuration,
    /// Compilation failed.
    Compile,
    /// File system problem.
    Io,
    /// Bad request.
    Protocol,
    /// Bug in Trellis.
    Internal,
}

impl ErrorKind {
    /// Classifies a build error.
    pub fn of(err: &BuildError) -> Self {
        match err {
            e if e.is_configuration() => ErrorKind::Configuration,
            BuildError::UnknownFile(_) => ErrorKind::Configuration,
            BuildError::Internal(_) => ErrorKind::Internal,
            _ => ErrorKind::Io,
        }
    }
}

/// Server status reported by `info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Lifecycle state.
    pub state: ServerState,
    /// Server process id.
    pub pid: u32,
    /// Server URL.
    pub url: String,
    /// Time since the server started.
    pub uptime_ms: u64,
    /// Workspace name.
    pub workspace: String,
    /// Target module name.
    pub main: String,
    /// Modules in the last manifest.
    pub modules: usize,
    /// Files in the last manifest.
    pub files: usize,
    /// Passes run since start.
    pub builds: u64,
    /// The most recent operation error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A server reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Outcome of a pass.
    Build {
        /// The outcome.
        outcome: BuildOutcome,
    },
    /// The request was accepted.
    Ack,
    /// Server status.
    Info {
        /// The status.
        info: ServerInfo,
    },
    /// One streamed event.
    Event {
        /// The event.
        record: EventRecord,
    },
    /// What to run for `exec`.
    Exec {
        /// The target.
        target: ExecTarget,
    },
    /// Path of a written manifest.
    Manifest {
        /// The path.
        path: PathBuf,
    },
    /// The request failed.
    Error {
        /// Category.
        kind: ErrorKind,
        /// Description.
        message: String,
    },
}

impl Response {
    /// An error response for a build error.
    pub fn from_build_error(err: &BuildError) -> Self {
        Response::Error {
            kind: ErrorKind::of(err),
            message: err.to_string(),
        }
    }

    /// Converts an error response into `Err`.
    pub fn into_result(self) -> Result<Response, ServerError> {
        match self {
            Response::Error { kind, message } => Err(ServerError::Remote { kind, message }),
            other => Ok(other),
        }
    }
}

/// Serializes a message as one line, newline included.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ServerError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parses one line.
pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T, ServerError> {
    Ok(serde_json::from_str(line.trim())?)
}
