//! Diagnostic rendering for terminal output.

use crate::diagnostic::Diagnostic;
use crate::severity::Severity;

/// Trait for rendering diagnostics into formatted output strings.
pub trait DiagnosticRenderer {
    /// Renders a single diagnostic into a formatted string.
    fn render(&self, diag: &Diagnostic) -> String;
}

/// Renders diagnostics in the compiler-conventional single-line form.
///
/// Produces output like:
/// ```text
/// src/user.ts:10:5: error: Cannot find name 'Usr'
///   = note: while compiling @acme/users
/// ```
pub struct TerminalRenderer {
    /// Whether to use ANSI color codes in output.
    pub color: bool,
}

impl TerminalRenderer {
    /// Creates a new terminal renderer.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn severity_label(&self, severity: Severity) -> String {
        if !self.color {
            return severity.to_string();
        }
        let code = match severity {
            Severity::Error => "31",
            Severity::Warning => "33",
            Severity::Note => "36",
            Severity::Help => "32",
        };
        format!("\x1b[1;{code}m{severity}\x1b[0m")
    }
}

impl DiagnosticRenderer for TerminalRenderer {
    fn render(&self, diag: &Diagnostic) -> String {
        let mut out = String::new();
        if let Some(location) = &diag.location {
            out.push_str(&format!("{location}: "));
        }
        out.push_str(&format!(
            "{}: {}",
            self.severity_label(diag.severity),
            diag.message
        ));
        for note in &diag.notes {
            out.push_str(&format!("\n  = note: {note}"));
        }
        out
    }
}
