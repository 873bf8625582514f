//! Client side of the protocol.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use trellis_context::port_from_url;

use crate::error::ServerError;
use crate::protocol::{decode_line, encode_line, Request, Response};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection details for a running compiler server.
///
/// Every request uses its own connection.
#[derive(Debug, Clone)]
pub struct Client {
    url: String,
    addr: SocketAddr,
}

impl Client {
    /// Connects to the server at `url` to check it is there.
    pub async fn connect(url: &str) -> Result<Self, ServerError> {
        let port = port_from_url(url).ok_or_else(|| ServerError::Unreachable {
            url: url.to_string(),
            reason: "URL has no port".to_string(),
        })?;
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let client = Self {
            url: url.to_string(),
            addr,
        };
        client.open().await?;
        Ok(client)
    }

    /// A client for a known address, without probing it.
    pub fn for_addr(addr: SocketAddr) -> Self {
        Self {
            url: format!("http://localhost:{}", addr.port()),
            addr,
        }
    }

    /// Server URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends `request` and waits for a single reply. Error replies become
    /// [`ServerError::Remote`].
    pub async fn request(&self, request: &Request) -> Result<Response, ServerError> {
        let mut stream = self.send(request).await?;
        match stream.next().await? {
            Some(response) => response.into_result(),
            None => Err(ServerError::Protocol(
                "connection closed before a reply".to_string(),
            )),
        }
    }

    /// Sends `request` and returns the stream of replies.
    pub async fn send(&self, request: &Request) -> Result<ResponseStream, ServerError> {
        let stream = self.open().await?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(encode_line(request)?.as_bytes()).await?;
        writer.flush().await?;
        Ok(ResponseStream {
            lines: BufReader::new(reader).lines(),
            _writer: writer,
        })
    }

    async fn open(&self) -> Result<TcpStream, ServerError> {
        let unreachable = |reason: String| ServerError::Unreachable {
            url: self.url.clone(),
            reason,
        };
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(self.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(unreachable(e.to_string())),
            Err(_) => Err(unreachable("connection timed out".to_string())),
        }
    }
}

/// Replies to one request, read line by line.
pub struct ResponseStream {
    lines: Lines<BufReader<OwnedReadHalf>>,
    // Kept open so the server does not see the client as gone.
    _writer: tokio::net::tcp::OwnedWriteHalf,
}

impl ResponseStream {
    /// Next reply, or `None` when the server closed the connection.
    pub async fn next(&mut self) -> Result<Option<Response>, ServerError> {
        loop {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(decode_line(&line)?)),
                None => return Ok(None),
            }
        }
    }
}
