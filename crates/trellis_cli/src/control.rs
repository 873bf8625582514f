//! Commands that talk to an already running server: `stop`, `restart`,
//! `info` and `event`.

use trellis_build::EventKind;
use trellis_config::EnvOverrides;
use trellis_server::{Request, Response};

use crate::connect::{self, unexpected};
use crate::error::CliError;
use crate::{report, GlobalArgs};

/// Asks the server to exit after its current pass.
pub async fn stop(global: &GlobalArgs, env: &EnvOverrides) -> Result<i32, CliError> {
    let client = connect::existing(global, env).await?;
    match client.request(&Request::Stop).await? {
        Response::Ack => {
            if !global.quiet {
                eprintln!("   Stopped compiler server at {}", client.url());
            }
            Ok(0)
        }
        _ => Err(unexpected("stop")),
    }
}

/// Asks the server to drop its in-memory state.
pub async fn restart(global: &GlobalArgs, env: &EnvOverrides) -> Result<i32, CliError> {
    let client = connect::existing(global, env).await?;
    match client.request(&Request::Restart).await? {
        Response::Ack => {
            if !global.quiet {
                eprintln!("   Restarted compiler server at {}", client.url());
            }
            Ok(0)
        }
        _ => Err(unexpected("restart")),
    }
}

/// Prints the server status.
pub async fn info(global: &GlobalArgs, env: &EnvOverrides) -> Result<i32, CliError> {
    let client = connect::existing(global, env).await?;
    match client.request(&Request::Info).await? {
        Response::Info { info } => {
            println!("{}", report::info(&info));
            Ok(0)
        }
        _ => Err(unexpected("info")),
    }
}

/// Streams events of one kind to stdout as JSON lines, starting with the
/// retained history.
pub async fn event(kind: EventKind, global: &GlobalArgs, env: &EnvOverrides) -> Result<i32, CliError> {
    let client = connect::existing(global, env).await?;
    let mut stream = client.send(&Request::Event { kind }).await?;
    loop {
        tokio::select! {
            next = stream.next() => match next? {
                Some(Response::Event { record }) => {
                    let line = serde_json::to_string(&record)
                        .map_err(|e| CliError::Server(e.into()))?;
                    println!("{line}");
                }
                Some(other) => {
                    other.into_result()?;
                }
                None => return Ok(0),
            },
            _ = tokio::signal::ctrl_c() => return Ok(0),
        }
    }
}
