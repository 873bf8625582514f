//! Accept loop and per-connection request handling.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use trellis_build::{BuildSession, Subscriber};
use trellis_common::InternalError;

use crate::coordinator::{Coordinator, SharedState, Trigger};
use crate::error::ServerError;
use crate::protocol::{decode_line, encode_line, ErrorKind, Request, Response};
use crate::state::ServerState;

/// Capacity of the trigger queue.
const TRIGGER_QUEUE: usize = 64;

/// Handle to a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shared: Arc<SharedState>,
    triggers: mpsc::Sender<Trigger>,
    coordinator: JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    /// Address the server listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Server URL.
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.local_addr.port())
    }

    /// State shared with connection handlers.
    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Asks the server to stop after the current pass and waits for it.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        let _ = self.triggers.send(Trigger::Stop { reply: None }).await;
        self.wait().await
    }

    /// Waits until the server stops on its own (a `stop` request).
    pub async fn wait(self) -> Result<(), ServerError> {
        match self.coordinator.await {
            Ok(result) => result,
            Err(e) => Err(ServerError::Build(
                InternalError::new(format!("coordinator task failed: {e}")).into(),
            )),
        }
    }
}

/// Starts serving `session` on `listener`.
///
/// The listener is normally the one won through
/// [`acquire_or_connect`](crate::acquire_or_connect).
#[instrument(skip_all)]
pub async fn serve(listener: TcpListener, session: BuildSession) -> Result<ServerHandle, ServerError> {
    let local_addr = listener.local_addr()?;
    let url = format!("http://localhost:{}", local_addr.port());
    let shared = Arc::new(SharedState::new(&session, url));
    shared.transition(ServerState::Starting)?;
    shared.transition(ServerState::Idle)?;
    info!(%local_addr, main = %session.context().main.name, "compiler server listening");

    let (tx, rx) = mpsc::channel(TRIGGER_QUEUE);
    let coordinator = tokio::spawn(Coordinator::new(session, Arc::clone(&shared), rx, tx.clone()).run());

    let accept_tx = tx.clone();
    let accept_shared = Arc::clone(&shared);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "connection");
                            let triggers = accept_tx.clone();
                            let shared = Arc::clone(&accept_shared);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, triggers, shared).await {
                                    warn!(%peer, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => error!("accept error: {e}"),
                    }
                }
                _ = accept_tx.closed() => {
                    debug!("coordinator gone, closing listener");
                    break;
                }
            }
        }
    });

    Ok(ServerHandle {
        local_addr,
        shared,
        triggers: tx,
        coordinator,
    })
}

async fn handle_connection(
    stream: TcpStream,
    triggers: mpsc::Sender<Trigger>,
    shared: Arc<SharedState>,
) -> Result<(), ServerError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }
    let request: Request = match decode_line(&line) {
        Ok(request) => request,
        Err(e) => {
            let response = Response::Error {
                kind: ErrorKind::Protocol,
                message: e.to_string(),
            };
            return write_response(&mut writer, &response).await;
        }
    };
    debug!(?request, "request");

    let response = match request {
        Request::Info => Response::Info {
            info: shared.info(),
        },
        Request::Event { kind } => {
            let subscriber = shared.events().subscribe_from(0, Some(kind));
            return stream_events(subscriber, reader, writer).await;
        }
        Request::Watch => {
            let subscriber = shared.events().subscribe(None);
            let response = dispatch(&triggers, |reply| Trigger::Watch { reply }).await;
            write_response(&mut writer, &response).await?;
            if response != Response::Ack {
                return Ok(());
            }
            return stream_events(subscriber, reader, writer).await;
        }
        Request::Build => dispatch(&triggers, |reply| Trigger::Build { reply }).await,
        Request::Stop => {
            dispatch(&triggers, |reply| Trigger::Stop { reply: Some(reply) }).await
        }
        Request::Restart => dispatch(&triggers, |reply| Trigger::Restart { reply }).await,
        Request::Exec { file } => dispatch(&triggers, |reply| Trigger::Exec { file, reply }).await,
        Request::Manifest { prod, output } => {
            dispatch(&triggers, |reply| Trigger::Manifest {
                prod,
                output,
                reply,
            })
            .await
        }
    };
    write_response(&mut writer, &response).await
}

/// Hands a trigger to the coordinator and waits for its reply.
async fn dispatch(
    triggers: &mpsc::Sender<Trigger>,
    make: impl FnOnce(oneshot::Sender<Response>) -> Trigger,
) -> Response {
    let (reply, receive) = oneshot::channel();
    if triggers.send(make(reply)).await.is_err() {
        return stopping();
    }
    receive.await.unwrap_or_else(|_| stopping())
}

fn stopping() -> Response {
    Response::Error {
        kind: ErrorKind::Internal,
        message: ServerError::Stopped.to_string(),
    }
}

/// Writes events until the log closes or the client goes away.
async fn stream_events(
    mut subscriber: Subscriber,
    mut reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
) -> Result<(), ServerError> {
    let mut discard = String::new();
    loop {
        tokio::select! {
            record = subscriber.recv() => {
                let Some(record) = record else {
                    return Ok(());
                };
                if write_response(&mut writer, &Response::Event { record }).await.is_err() {
                    return Ok(());
                }
            }
            read = reader.read_line(&mut discard) => {
                match read {
                    Ok(0) | Err(_) => return Ok(()),
                    Ok(_) => discard.clear(),
                }
            }
        }
    }
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> Result<(), ServerError> {
    writer.write_all(encode_line(response)?.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
