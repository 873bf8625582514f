//! The compiler server.
//!
//! At most one server runs per workspace. It listens on a port derived from
//! the workspace path, so binding that port doubles as the workspace lock:
//! [`acquire_or_connect`] either wins the port and becomes the owner, or
//! connects to the server that already holds it.
//!
//! # Protocol
//!
//! Newline-delimited JSON over TCP. Each connection sends one [`Request`]
//! (`{"op": "build"}`, `{"op": "event", "kind": "log"}`, ...) and reads one
//! or more [`Response`] lines back. `watch` and `event` keep streaming until
//! the client disconnects or the server stops.
//!
//! # Concurrency
//!
//! All requests that touch the build go through the [`coordinator`], which
//! owns the [`BuildSession`](trellis_build::BuildSession) and runs one pass
//! at a time on a blocking thread. Build requests that arrive during a pass
//! share its outcome.

#![warn(missing_docs)]

pub mod client;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod protocol;
pub mod server;
pub mod state;
pub mod watch;

pub use client::Client;
pub use coordinator::{Coordinator, SharedState, Trigger};
pub use error::ServerError;
pub use lock::{acquire_or_connect, Endpoint};
pub use protocol::{ErrorKind, Request, Response, ServerInfo};
pub use server::{serve, ServerHandle};
pub use state::{ServerState, StateMachine};
pub use watch::FileWatcher;
