//! Single-writer election.
//!
//! The server port is derived from the workspace path, so whoever binds it
//! owns the workspace. Everyone else becomes a client of the owner.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use trellis_context::port_from_url;

use crate::client::Client;
use crate::error::ServerError;

/// Result of [`acquire_or_connect`].
pub enum Endpoint {
    /// This process bound the port and must run the server.
    Owner(TcpListener),
    /// Another process owns the workspace.
    Client(Client),
}

/// Binds the server port for `url`, or connects to the server holding it.
pub async fn acquire_or_connect(url: &str) -> Result<Endpoint, ServerError> {
    let port = port_from_url(url).ok_or_else(|| ServerError::Unreachable {
        url: url.to_string(),
        reason: "URL has no port".to_string(),
    })?;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    match TcpListener::bind(addr).await {
        Ok(listener) => {
            tracing::debug!(%addr, "acquired workspace endpoint");
            Ok(Endpoint::Owner(listener))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            tracing::debug!(%addr, "endpoint in use, connecting");
            Client::connect(url).await.map(Endpoint::Client)
        }
        Err(e) => Err(ServerError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Connects to a running server without trying to become one.
pub async fn connect_existing(url: &str) -> Result<Client, ServerError> {
    Client::connect(url).await
}
