//! Log subscriber setup.

use tracing_subscriber::EnvFilter;
use trellis_config::{EnvOverrides, LogLevel};

use crate::GlobalArgs;

/// Picks the log level for a command.
///
/// `--verbose` and `--quiet` win over `TRELLIS_BUILD_LOG`, which wins over
/// the per-command default.
pub fn level_for(global: &GlobalArgs, env: &EnvOverrides, builds: bool) -> LogLevel {
    if global.verbose {
        LogLevel::Debug
    } else if global.quiet {
        LogLevel::Warn
    } else {
        env.log_level(builds)
    }
}

/// Installs the global subscriber. `RUST_LOG`, when set, replaces the level
/// entirely.
pub fn init(level: LogLevel, color: bool) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(level.as_directive()),
    };
    // A second init in the same process is ignored.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(color)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn global(quiet: bool, verbose: bool) -> GlobalArgs {
        GlobalArgs {
            quiet,
            verbose,
            color: false,
            cwd: None,
        }
    }

    #[test]
    fn flags_override_environment() {
        let env = EnvOverrides::from_vars(HashMap::from([(
            "TRELLIS_BUILD_LOG".to_string(),
            "none".to_string(),
        )]));
        assert_eq!(level_for(&global(false, true), &env, false), LogLevel::Debug);
        assert_eq!(level_for(&global(true, false), &env, true), LogLevel::Warn);
        assert_eq!(level_for(&global(false, false), &env, true), LogLevel::None);
    }

    #[test]
    fn command_defaults() {
        let env = EnvOverrides::default();
        assert_eq!(level_for(&global(false, false), &env, true), LogLevel::Info);
        assert_eq!(level_for(&global(false, false), &env, false), LogLevel::Warn);
    }
}
