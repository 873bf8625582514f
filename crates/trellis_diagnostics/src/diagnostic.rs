//! Structured diagnostic messages with an optional source location.

use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A position in a source file, 1-based.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// The file the diagnostic refers to.
    pub file: PathBuf,
    /// Line number, if known.
    pub line: Option<u32>,
    /// Column number, if known.
    pub column: Option<u32>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file.display())?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
        }
        Ok(())
    }
}

/// A diagnostic emitted by the toolchain or by the build pipeline itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity level of this diagnostic.
    pub severity: Severity,
    /// The main diagnostic message.
    pub message: String,
    /// Where the problem was detected, if the reporter knew.
    pub location: Option<Location>,
    /// Explanatory footnotes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Creates a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            location: None,
            notes: Vec::new(),
        }
    }

    /// Creates a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            location: None,
            notes: Vec::new(),
        }
    }

    /// Attaches a file location.
    pub fn at(mut self, file: impl Into<PathBuf>, line: Option<u32>, column: Option<u32>) -> Self {
        self.location = Some(Location {
            file: file.into(),
            line,
            column,
        });
        self
    }

    /// Adds a note to this diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_error() {
        let diag = Diagnostic::error("unexpected token");
        assert_eq!(diag.severity, Severity::Error);
        assert!(diag.location.is_none());
    }

    #[test]
    fn location_display() {
        let diag = Diagnostic::warning("unused").at("src/a.ts", Some(3), Some(7));
        assert_eq!(diag.location.unwrap().to_string(), "src/a.ts:3:7");
    }

    #[test]
    fn location_without_column() {
        let loc = Location {
            file: PathBuf::from("src/a.ts"),
            line: Some(9),
            column: None,
        };
        assert_eq!(loc.to_string(), "src/a.ts:9");
    }

    #[test]
    fn serde_roundtrip_keeps_notes() {
        let diag = Diagnostic::error("bad").with_note("while compiling");
        let json = serde_json::to_string(&diag).unwrap();
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diag);
    }
}
