//! `trellis manifest`: write the module manifest.
//!
//! With a server running, the server writes it from its last pass. Without
//! one, the workspace is scanned in this process and nothing is compiled.

use std::path::PathBuf;

use trellis_build::generate_manifest;
use trellis_config::EnvOverrides;
use trellis_server::{Request, Response, ServerError};

use crate::connect::{self, unexpected};
use crate::error::CliError;
use crate::GlobalArgs;

/// Writes the manifest and prints its path.
pub async fn run(
    prod: bool,
    output: Option<PathBuf>,
    global: &GlobalArgs,
    env: &EnvOverrides,
) -> Result<i32, CliError> {
    let output = output.map(|o| connect::absolute(global, &o)).transpose()?;
    let path = match connect::existing(global, env).await {
        Ok(client) => match client.request(&Request::Manifest { prod, output }).await? {
            Response::Manifest { path } => path,
            _ => return Err(unexpected("manifest")),
        },
        Err(CliError::Server(ServerError::Unreachable { .. })) => {
            tracing::debug!("no compiler server, scanning in-process");
            generate_manifest(global.cwd.as_deref(), env, prod, output.as_deref())?
        }
        Err(e) => return Err(e),
    };
    println!("{}", path.display());
    Ok(0)
}
