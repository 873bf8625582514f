//! Source preprocessing applied on read.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use trellis_config::PreprocessMode;

/// Rewrites source text before the toolchain sees it.
///
/// `restore` undoes `preprocess`, so text that went through both compares
/// equal to the original.
pub trait Preprocessor: Send + Sync {
    /// Returns the rewritten source for `path`.
    fn preprocess(&self, path: &Path, source: &str) -> String;

    /// Strips everything `preprocess` added.
    fn restore(&self, text: &str) -> String;
}

/// Leaves source untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityPreprocessor;

impl Preprocessor for IdentityPreprocessor {
    fn preprocess(&self, _path: &Path, source: &str) -> String {
        source.to_string()
    }

    fn restore(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Tags `console.<level>(` calls with a `/*trellis:<file>:<line>*/` marker so
/// runtime log output can point back at the source line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMarkerPreprocessor;

fn call_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bconsole\.(log|info|warn|error|debug|trace)\(")
            .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
    })
}

fn marker_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/\*trellis:[^*]*\*/").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
    })
}

impl Preprocessor for LogMarkerPreprocessor {
    fn preprocess(&self, path: &Path, source: &str) -> String {
        let clean = self.restore(source);
        let file = path.to_string_lossy().replace('*', "");
        let mut out = String::with_capacity(clean.len());
        for (idx, line) in clean.split_inclusive('\n').enumerate() {
            let tagged = call_pattern().replace_all(line, |caps: &regex::Captures<'_>| {
                format!("{}/*trellis:{}:{}*/", &caps[0], file, idx + 1)
            });
            out.push_str(&tagged);
        }
        out
    }

    fn restore(&self, text: &str) -> String {
        marker_pattern().replace_all(text, "").into_owned()
    }
}

/// Returns the preprocessor for a configured mode.
pub fn preprocessor_for(mode: PreprocessMode) -> Box<dyn Preprocessor> {
    match mode {
        PreprocessMode::None => Box::new(IdentityPreprocessor),
        PreprocessMode::LogMarkers => Box::new(LogMarkerPreprocessor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_noop() {
        let p = IdentityPreprocessor;
        assert_eq!(p.preprocess(Path::new("a.ts"), "x"), "x");
        assert_eq!(p.restore("x"), "x");
    }

    #[test]
    fn markers_carry_file_and_line() {
        let p = LogMarkerPreprocessor;
        let src = "const a = 1;\nconsole.log('hi');\n  console.error(err);\n";
        let out = p.preprocess(Path::new("src/a.ts"), src);
        assert_eq!(
            out,
            "const a = 1;\nconsole.log(/*trellis:src/a.ts:2*/'hi');\n  console.error(/*trellis:src/a.ts:3*/err);\n"
        );
    }

    #[test]
    fn restore_strips_markers() {
        let p = LogMarkerPreprocessor;
        let src = "console.warn('x'); console.info('y')";
        let out = p.preprocess(Path::new("a.ts"), src);
        assert_ne!(out, src);
        assert_eq!(p.restore(&out), src);
    }

    #[test]
    fn preprocess_is_idempotent() {
        let p = LogMarkerPreprocessor;
        let once = p.preprocess(Path::new("a.ts"), "console.log(1)");
        let twice = p.preprocess(Path::new("a.ts"), &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn unrelated_calls_untouched() {
        let p = LogMarkerPreprocessor;
        let src = "myconsole.log(1); console.table(rows);";
        assert_eq!(p.preprocess(Path::new("a.ts"), src), src);
    }

    #[test]
    fn mode_selects_preprocessor() {
        let p = preprocessor_for(PreprocessMode::LogMarkers);
        assert!(p.preprocess(Path::new("a.ts"), "console.log(1)").contains("trellis:"));
        let p = preprocessor_for(PreprocessMode::None);
        assert_eq!(p.preprocess(Path::new("a.ts"), "console.log(1)"), "console.log(1)");
    }
}
