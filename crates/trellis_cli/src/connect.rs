//! Reaching the compiler server for the current workspace.
//!
//! Commands that build go through [`open`]: if no server runs for the
//! workspace, this process wins the port and serves in-process for as long
//! as the command lasts. Control commands use [`existing`] and never start
//! a server.

use std::path::{Path, PathBuf};

use trellis_build::events::DEFAULT_CAPACITY;
use trellis_build::{BuildSession, EventLog};
use trellis_config::EnvOverrides;
use trellis_context::{load_context, ManifestContext, PathResolver};
use trellis_server::{acquire_or_connect, serve, Client, Endpoint, ServerError, ServerHandle};

use crate::error::CliError;
use crate::GlobalArgs;

/// A client plus the in-process server, when this process owns it.
pub struct Connection {
    client: Client,
    server: Option<ServerHandle>,
}

impl Connection {
    /// The client to send requests with.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Whether this process runs the server.
    pub fn is_owner(&self) -> bool {
        self.server.is_some()
    }

    /// Stops the in-process server, if any.
    pub async fn close(self) -> Result<(), CliError> {
        if let Some(server) = self.server {
            server.shutdown().await?;
        }
        Ok(())
    }
}

/// Resolves the context for the working folder.
pub fn context(global: &GlobalArgs, env: &EnvOverrides) -> Result<ManifestContext, CliError> {
    let (ctx, _) = load_context(&PathResolver::new(), global.cwd.as_deref(), env)?;
    Ok(ctx)
}

/// Connects to the workspace's server, starting one in-process if none runs.
pub async fn open(global: &GlobalArgs, env: &EnvOverrides) -> Result<Connection, CliError> {
    let ctx = context(global, env)?;
    match acquire_or_connect(&ctx.build.compiler_url).await? {
        Endpoint::Client(client) => {
            tracing::debug!(url = client.url(), "using running compiler server");
            Ok(Connection {
                client,
                server: None,
            })
        }
        Endpoint::Owner(listener) => {
            let session = BuildSession::open(
                global.cwd.as_deref(),
                env.clone(),
                EventLog::new(DEFAULT_CAPACITY),
            )?;
            let server = serve(listener, session).await?;
            Ok(Connection {
                client: Client::for_addr(server.local_addr()),
                server: Some(server),
            })
        }
    }
}

/// Connects to a running server without starting one.
pub async fn existing(global: &GlobalArgs, env: &EnvOverrides) -> Result<Client, CliError> {
    let ctx = context(global, env)?;
    Ok(trellis_server::lock::connect_existing(&ctx.build.compiler_url).await?)
}

/// Makes `path` absolute against `--cwd` or the current directory.
pub fn absolute(global: &GlobalArgs, path: &Path) -> Result<PathBuf, CliError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let base = match &global.cwd {
        Some(cwd) if cwd.is_absolute() => cwd.clone(),
        Some(cwd) => current_dir()?.join(cwd),
        None => current_dir()?,
    };
    Ok(base.join(path))
}

fn current_dir() -> Result<PathBuf, CliError> {
    std::env::current_dir().map_err(|source| CliError::Io {
        context: "cannot read the current directory".to_string(),
        source,
    })
}

/// An error for a reply of the wrong type.
pub fn unexpected(what: &str) -> CliError {
    CliError::Server(ServerError::Protocol(format!(
        "unexpected reply to `{what}`"
    )))
}
