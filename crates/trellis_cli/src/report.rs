//! Terminal output for outcomes and events.

use trellis_build::{BuildOutcome, EventPayload, EventRecord};
use trellis_diagnostics::{Diagnostic, DiagnosticRenderer, TerminalRenderer};
use trellis_server::ServerInfo;

use crate::GlobalArgs;

/// Prints diagnostics and a summary line for a pass.
pub fn outcome(outcome: &BuildOutcome, global: &GlobalArgs) {
    let renderer = TerminalRenderer::new(global.color);
    for diag in &outcome.diagnostics {
        eprintln!("{}", renderer.render(diag));
    }
    if global.quiet && outcome.is_success() {
        return;
    }
    eprintln!("{}", summary(outcome));
}

fn summary(outcome: &BuildOutcome) -> String {
    let verb = if outcome.is_success() { "Built" } else { "Failed" };
    let mut line = format!(
        "   {verb} {} compiled, {} copied, {} removed",
        outcome.compiled, outcome.copied, outcome.removed
    );
    if !outcome.failed.is_empty() {
        line.push_str(&format!(", {} failed", outcome.failed.len()));
    }
    if outcome.compiler_changed {
        line.push_str(" (compiler changed)");
    }
    line.push_str(&format!(" in {} ms", outcome.duration_ms));
    line
}

/// Prints one streamed event in watch mode.
///
/// Log events are always shown; progress and state only with `--verbose`.
pub fn event(record: &EventRecord, global: &GlobalArgs) {
    match &record.payload {
        EventPayload::Log {
            severity,
            message,
            location,
        } => {
            if global.quiet && !severity.is_error() {
                return;
            }
            let mut diag = Diagnostic::error(message.clone());
            diag.severity = *severity;
            let rendered = TerminalRenderer::new(global.color).render(&diag);
            match location {
                Some(loc) => eprintln!("{loc}: {rendered}"),
                None => eprintln!("{rendered}"),
            }
        }
        payload if global.verbose => eprintln!("   [{}] {payload}", record.kind),
        _ => {}
    }
}

/// Formats `info` for humans.
pub fn info(info: &ServerInfo) -> String {
    let mut out = format!(
        "url:       {}\nstate:     {}\npid:       {}\nuptime:    {:.1}s\nworkspace: {}\nmain:      {}\nmodules:   {}\nfiles:     {}\nbuilds:    {}",
        info.url,
        info.state,
        info.pid,
        info.uptime_ms as f64 / 1000.0,
        info.workspace,
        info.main,
        info.modules,
        info.files,
        info.builds,
    );
    if let Some(err) = &info.last_error {
        out.push_str(&format!("\nlast error: {err}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_build::BuildStatus;
    use trellis_server::ServerState;

    fn outcome(status: BuildStatus) -> BuildOutcome {
        BuildOutcome {
            status,
            delta: Default::default(),
            compiler_changed: false,
            compiled: 3,
            copied: 1,
            removed: 0,
            failed: Vec::new(),
            diagnostics: Vec::new(),
            duration_ms: 12,
        }
    }

    #[test]
    fn summary_line() {
        assert_eq!(
            summary(&outcome(BuildStatus::Success)),
            "   Built 3 compiled, 1 copied, 0 removed in 12 ms"
        );
        let mut failed = outcome(BuildStatus::Failed);
        failed.failed.push("src/a.ts".into());
        failed.compiler_changed = true;
        assert_eq!(
            summary(&failed),
            "   Failed 3 compiled, 1 copied, 0 removed, 1 failed (compiler changed) in 12 ms"
        );
    }

    #[test]
    fn info_lists_last_error() {
        let mut i = ServerInfo {
            state: ServerState::Watching,
            pid: 42,
            url: "http://localhost:20123".to_string(),
            uptime_ms: 1500,
            workspace: "acme".to_string(),
            main: "@acme/app".to_string(),
            modules: 3,
            files: 40,
            builds: 2,
            last_error: None,
        };
        let text = info(&i);
        assert!(text.contains("state:     watching"));
        assert!(text.contains("uptime:    1.5s"));
        assert!(!text.contains("last error"));
        i.last_error = Some("no package.json".to_string());
        assert!(info(&i).ends_with("last error: no package.json"));
    }
}
