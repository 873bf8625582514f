//! Error types for configuration loading and validation.

use std::path::PathBuf;

/// Errors raised while locating or reading workspace configuration.
///
/// Every variant is a configuration failure: fatal to the current operation,
/// reported to the user, and never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading a configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The content could not be parsed.
    #[error("failed to parse {file}: {reason}")]
    ParseError {
        /// Which file (or logical source) failed to parse.
        file: String,
        /// Parser message.
        reason: String,
    },

    /// No package descriptor exists between the start directory and the filesystem root.
    #[error("could not find package.json in {} or any parent directory", .0.display())]
    NoDescriptor(PathBuf),

    /// A module specifier does not resolve to an installed or workspace module.
    #[error("unable to resolve module '{0}'")]
    UnresolvedModule(String),

    /// A required field is missing.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_no_descriptor() {
        let err = ConfigError::NoDescriptor(PathBuf::from("/tmp/x"));
        assert_eq!(
            format!("{err}"),
            "could not find package.json in /tmp/x or any parent directory"
        );
    }

    #[test]
    fn display_unresolved_module() {
        let err = ConfigError::UnresolvedModule("@acme/missing".to_string());
        assert_eq!(format!("{err}"), "unable to resolve module '@acme/missing'");
    }

    #[test]
    fn display_parse_error() {
        let err = ConfigError::ParseError {
            file: "trellis.toml".to_string(),
            reason: "expected '=' at line 3".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "failed to parse trellis.toml: expected '=' at line 3"
        );
    }

    #[test]
    fn display_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::IoError(io_err);
        assert!(format!("{err}").starts_with("failed to read configuration:"));
    }
}
