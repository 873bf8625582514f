//! Environment variable overrides.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Selects the module to build instead of the workspace root.
pub const ENV_MODULE: &str = "TRELLIS_MODULE";
/// Build log verbosity (`debug`, `info`, `warn`, `none`).
pub const ENV_BUILD_LOG: &str = "TRELLIS_BUILD_LOG";
/// Overrides the on-disk cache folder.
pub const ENV_CACHE_DIR: &str = "TRELLIS_CACHE_DIR";

/// Build log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Nothing is logged.
    None,
    /// Warnings and errors.
    Warn,
    /// Progress and state changes.
    Info,
    /// Everything, including per-file decisions.
    Debug,
}

impl LogLevel {
    /// Returns the default level for a command: `info` for commands that build, `warn` otherwise.
    pub fn default_for(builds: bool) -> Self {
        if builds {
            LogLevel::Info
        } else {
            LogLevel::Warn
        }
    }

    /// Returns the `tracing` filter directive for this level.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" | "0" => Ok(LogLevel::None),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "trace" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::None => "none",
            other => other.as_directive(),
        };
        f.write_str(s)
    }
}

/// Overrides read from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// Module specifier from `TRELLIS_MODULE`.
    pub module: Option<String>,
    /// Verbosity from `TRELLIS_BUILD_LOG`. Unparseable values are ignored.
    pub build_log: Option<LogLevel>,
    /// Cache folder from `TRELLIS_CACHE_DIR`.
    pub cache_dir: Option<PathBuf>,
}

impl EnvOverrides {
    /// Reads overrides from the current process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars().collect())
    }

    /// Reads overrides from an explicit variable map.
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        let non_empty = |key: &str| vars.get(key).filter(|v| !v.trim().is_empty()).cloned();
        Self {
            module: non_empty(ENV_MODULE),
            build_log: non_empty(ENV_BUILD_LOG).and_then(|v| v.parse().ok()),
            cache_dir: non_empty(ENV_CACHE_DIR).map(PathBuf::from),
        }
    }

    /// Returns the effective log level for a command.
    pub fn log_level(&self, builds: bool) -> LogLevel {
        self.build_log.unwrap_or(LogLevel::default_for(builds))
    }
}
