//! Trellis CLI: the command-line interface to the incremental build.
//!
//! `trellis build` runs one pass and `trellis watch` keeps rebuilding on
//! change. Both go through the workspace's compiler server, starting one
//! in-process when none runs. `stop`, `restart`, `info` and `event` control
//! a running server; `exec` builds and runs a file; `manifest` writes the
//! module manifest.

#![warn(missing_docs)]

mod build;
mod connect;
mod control;
mod error;
mod exec;
mod logging;
mod manifest;
mod report;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use trellis_build::EventKind;
use trellis_config::EnvOverrides;
use trellis_diagnostics::{Diagnostic, DiagnosticRenderer, TerminalRenderer};

/// Trellis: incremental builds for TypeScript workspaces.
#[derive(Parser, Debug)]
#[command(name = "trellis", version, about = "Trellis incremental build orchestrator")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Control colored output.
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Run as if started in this folder.
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one incremental build pass.
    Build,
    /// Build, then rebuild whenever files change.
    #[command(alias = "start")]
    Watch,
    /// Stop the running compiler server.
    Stop,
    /// Drop the compiler server's in-memory state.
    Restart,
    /// Show compiler server status.
    Info,
    /// Stream compiler server events of one kind.
    Event {
        /// Event kind: log, progress or state.
        kind: EventKind,
    },
    /// Build, then run the compiled output of a file.
    Exec {
        /// Source file to run.
        file: PathBuf,

        /// Arguments passed to the program.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Write the module manifest.
    Manifest {
        /// Leave out development-only modules and tests.
        #[arg(long)]
        prod: bool,

        /// Destination file (defaults to the tool folder).
        output: Option<PathBuf>,
    },
}

impl Command {
    /// Whether the command runs a build, which raises the default log level.
    fn builds(&self) -> bool {
        matches!(self, Command::Build | Command::Watch | Command::Exec { .. })
    }
}

/// Controls whether colored output is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    /// Detect from terminal capabilities.
    Auto,
    /// Always produce colored output.
    Always,
    /// Never produce colored output.
    Never,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Whether to use colored output.
    pub color: bool,
    /// Folder to resolve the workspace from.
    pub cwd: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let color = match cli.color {
        ColorChoice::Auto => std::io::stderr().is_terminal(),
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    };

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        color,
        cwd: cli.cwd,
    };
    let env = EnvOverrides::from_env();
    logging::init(
        logging::level_for(&global, &env, cli.command.builds()),
        color,
    );

    let result = match cli.command {
        Command::Build => build::run(&global, &env).await,
        Command::Watch => build::watch(&global, &env).await,
        Command::Stop => control::stop(&global, &env).await,
        Command::Restart => control::restart(&global, &env).await,
        Command::Info => control::info(&global, &env).await,
        Command::Event { kind } => control::event(kind, &global, &env).await,
        Command::Exec { ref file, ref args } => exec::run(file, args, &global, &env).await,
        Command::Manifest { prod, output } => manifest::run(prod, output, &global, &env).await,
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            let renderer = TerminalRenderer::new(global.color);
            eprintln!("{}", renderer.render(&Diagnostic::error(e.to_string())));
            process::exit(e.exit_code());
        }
    }
}
