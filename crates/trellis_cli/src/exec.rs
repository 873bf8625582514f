//! `trellis exec`: build, then run the compiled output of a file.

use std::path::Path;

use trellis_config::EnvOverrides;
use trellis_server::{Request, Response};

use crate::connect::{self, unexpected};
use crate::error::CliError;
use crate::GlobalArgs;

/// Exit code relayed when the program was killed by a signal.
const EXIT_SIGNALED: i32 = 1;

/// Builds, then runs `<runtime> <runtime args> <output> <args>` and returns
/// its exit code.
pub async fn run(
    file: &Path,
    args: &[String],
    global: &GlobalArgs,
    env: &EnvOverrides,
) -> Result<i32, CliError> {
    let file = connect::absolute(global, file)?;
    let conn = connect::open(global, env).await?;
    let reply = conn.client().request(&Request::Exec { file }).await;
    conn.close().await?;

    let Response::Exec { target } = reply? else {
        return Err(unexpected("exec"));
    };
    tracing::debug!(runtime = %target.runtime, output = %target.output.display(), "running");
    let status = tokio::process::Command::new(&target.runtime)
        .args(&target.args)
        .arg(&target.output)
        .args(args)
        .status()
        .await
        .map_err(|source| CliError::Io {
            context: format!("failed to run `{}`", target.runtime),
            source,
        })?;
    Ok(status.code().unwrap_or(EXIT_SIGNALED))
}
