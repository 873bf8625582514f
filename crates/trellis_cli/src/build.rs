//! `trellis build` and `trellis watch`.

use trellis_config::EnvOverrides;
use trellis_server::{Request, Response, ServerError};

use crate::connect::{self, unexpected};
use crate::error::{CliError, EXIT_COMPILE};
use crate::{report, GlobalArgs};

/// Runs one pass. Returns 0 on success, 1 if any file failed to compile.
pub async fn run(global: &GlobalArgs, env: &EnvOverrides) -> Result<i32, CliError> {
    let conn = connect::open(global, env).await?;
    let reply = conn.client().request(&Request::Build).await;
    conn.close().await?;

    let Response::Build { outcome } = reply? else {
        return Err(unexpected("build"));
    };
    report::outcome(&outcome, global);
    Ok(if outcome.is_success() { 0 } else { EXIT_COMPILE })
}

/// Enables watch mode and prints events until Ctrl-C or until the server
/// stops.
pub async fn watch(global: &GlobalArgs, env: &EnvOverrides) -> Result<i32, CliError> {
    let conn = connect::open(global, env).await?;
    let mut stream = conn.client().send(&Request::Watch).await?;
    match stream.next().await? {
        Some(Response::Ack) => {}
        Some(other) => {
            other.into_result()?;
            return Err(unexpected("watch"));
        }
        None => return Err(ServerError::Stopped.into()),
    }
    if !global.quiet {
        let role = if conn.is_owner() { "serving" } else { "attached to" };
        eprintln!("   Watching ({role} {})", conn.client().url());
    }

    loop {
        tokio::select! {
            next = stream.next() => match next? {
                Some(Response::Event { record }) => report::event(&record, global),
                Some(other) => {
                    other.into_result()?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("interrupted");
                break;
            }
        }
    }
    drop(stream);
    conn.close().await?;
    Ok(0)
}
