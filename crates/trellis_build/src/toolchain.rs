//! The toolchain seam.
//!
//! A [`Toolchain`] turns one source file into one output file. It reads
//! through the [`CompilerHost`] so it sees preprocessed, cached text, and
//! writes through it so the result lands in the artifact cache.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use trellis_cache::CompilerHost;
use trellis_config::ToolchainSettings;
use trellis_diagnostics::{Diagnostic, Severity};
use trellis_manifest::{FileRole, FileType};

use crate::error::CompileError;

/// One file to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileUnit {
    /// Name of the module the file belongs to.
    pub module: String,
    /// Absolute source path.
    pub source: PathBuf,
    /// Absolute output path.
    pub output: PathBuf,
    /// Kind of source.
    pub file_type: FileType,
    /// Role of the file within its module.
    pub role: FileRole,
}

/// Compiles source files.
pub trait Toolchain: Send {
    /// A stable description of the toolchain, part of the compiler fingerprint.
    fn identity(&self) -> String;

    /// Compiles `unit.source` into `unit.output` through `host`.
    fn compile(&self, host: &mut dyn CompilerHost, unit: &CompileUnit) -> Result<(), CompileError>;
}

/// Selects the toolchain configured in `[toolchain]`.
pub fn toolchain_for(settings: &ToolchainSettings) -> Box<dyn Toolchain> {
    match settings.command.split_first() {
        Some((program, args)) => Box::new(CommandToolchain::new(program.clone(), args.to_vec())),
        None => Box::new(PassthroughToolchain),
    }
}

/// Writes preprocessed source to the output unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughToolchain;

impl Toolchain for PassthroughToolchain {
    fn identity(&self) -> String {
        "passthrough".to_string()
    }

    fn compile(&self, host: &mut dyn CompilerHost, unit: &CompileUnit) -> Result<(), CompileError> {
        let text = host.read_file(&unit.source)?;
        host.write_file(&unit.output, &text, Some(&unit.source))?;
        Ok(())
    }
}

/// Runs an external transpiler per file.
///
/// The preprocessed source is piped to the command's stdin and its stdout
/// becomes the output. The source path is appended as the last argument so
/// the command can name it in messages. On a non-zero exit, stderr lines
/// of the form `file:line:col: message` become diagnostics.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    program: String,
    args: Vec<String>,
}

impl CommandToolchain {
    /// Creates a toolchain running `program` with `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn run(&self, source: &Path, input: String) -> Result<std::process::Output, CompileError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(source)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CompileError::Toolchain {
                message: format!("cannot run `{}`: {e}", self.program),
            })?;

        let stdin = child.stdin.take();
        // A separate writer keeps large inputs from deadlocking against a full stdout pipe.
        let writer = std::thread::spawn(move || match stdin {
            Some(mut pipe) => pipe.write_all(input.as_bytes()),
            None => Ok(()),
        });
        let output = child.wait_with_output().map_err(|e| CompileError::Toolchain {
            message: format!("`{}` failed: {e}", self.program),
        })?;
        match writer.join() {
            Ok(Ok(())) => {}
            // The command may exit without reading its input.
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => {
                return Err(CompileError::Toolchain {
                    message: format!("writing to `{}`: {e}", self.program),
                })
            }
            Err(_) => {
                return Err(CompileError::Toolchain {
                    message: "stdin writer panicked".to_string(),
                })
            }
        }
        Ok(output)
    }
}

impl Toolchain for CommandToolchain {
    fn identity(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        format!("command:{}", parts.join(" "))
    }

    fn compile(&self, host: &mut dyn CompilerHost, unit: &CompileUnit) -> Result<(), CompileError> {
        let input = host.read_file(&unit.source)?;
        let output = self.run(&unit.source, input)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut diags = parse_diagnostics(&stderr, &unit.source);
            if diags.is_empty() {
                diags.push(
                    Diagnostic::error(format!("`{}` exited with {}", self.program, output.status))
                        .at(&unit.source, None, None),
                );
            }
            return Err(CompileError::Diagnostics(diags));
        }
        let text = String::from_utf8(output.stdout).map_err(|_| CompileError::Toolchain {
            message: format!("`{}` produced non-UTF-8 output", self.program),
        })?;
        host.write_file(&unit.output, &text, Some(&unit.source))?;
        Ok(())
    }
}

/// Parses `file:line:col: [severity:] message` lines.
///
/// Lines that do not match are attached as notes to the preceding
/// diagnostic, or become an error at `fallback` when there is none.
pub fn parse_diagnostics(stderr: &str, fallback: &Path) -> Vec<Diagnostic> {
    let mut diags: Vec<Diagnostic> = Vec::new();
    for line in stderr.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()) {
        if let Some(diag) = parse_line(line) {
            diags.push(diag);
            continue;
        }
        match diags.last_mut() {
            Some(last) => last.notes.push(line.trim().to_string()),
            None => diags.push(Diagnostic::error(line.trim()).at(fallback, None, None)),
        }
    }
    diags
}

fn parse_line(line: &str) -> Option<Diagnostic> {
    let (location, message) = line.split_once(": ")?;
    let mut parts = location.rsplitn(3, ':');
    let column: u32 = parts.next()?.parse().ok()?;
    let line_no: u32 = parts.next()?.parse().ok()?;
    let file = parts.next().filter(|f| !f.is_empty())?;

    let (severity, message) = match message.split_once(": ") {
        Some(("error", rest)) => (Severity::Error, rest),
        Some(("warning", rest)) => (Severity::Warning, rest),
        Some(("note", rest)) => (Severity::Note, rest),
        Some(("help", rest)) => (Severity::Help, rest),
        _ => (Severity::Error, message),
    };
    let diag = Diagnostic {
        severity,
        ..Diagnostic::error(message)
    };
    Some(diag.at(file, Some(line_no), Some(column)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_cache::SourceCache;

    fn unit(dir: &Path) -> CompileUnit {
        CompileUnit {
            module: "app".to_string(),
            source: dir.join("src/a.ts"),
            output: dir.join("out/src/a.js"),
            file_type: FileType::Ts,
            role: FileRole::Src,
        }
    }

    fn setup() -> (tempfile::TempDir, SourceCache) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("src/a.ts"), "export const a = 1;\n").unwrap();
        let cache = SourceCache::without_preprocessing(&tmp.path().join("cache"));
        (tmp, cache)
    }

    #[test]
    fn passthrough_copies_source() {
        let (tmp, mut cache) = setup();
        let unit = unit(tmp.path());
        PassthroughToolchain.compile(&mut cache, &unit).unwrap();
        let out = std::fs::read_to_string(&unit.output).unwrap();
        assert_eq!(out, "export const a = 1;\n");
        assert!(!cache.hash_changed(&unit.source, None).unwrap());
    }

    #[test]
    fn toolchain_selection() {
        let empty = ToolchainSettings::default();
        assert_eq!(toolchain_for(&empty).identity(), "passthrough");
        let cmd = ToolchainSettings {
            command: vec!["tsc-stdio".to_string(), "--strict".to_string()],
            ..Default::default()
        };
        assert_eq!(toolchain_for(&cmd).identity(), "command:tsc-stdio --strict");
    }

    #[cfg(unix)]
    #[test]
    fn command_output_becomes_file() {
        let (tmp, mut cache) = setup();
        let unit = unit(tmp.path());
        let tc = CommandToolchain::new("sh", vec!["-c".to_string(), "tr a-z A-Z".to_string()]);
        tc.compile(&mut cache, &unit).unwrap();
        let out = std::fs::read_to_string(&unit.output).unwrap();
        assert_eq!(out, "EXPORT CONST A = 1;\n");
    }

    #[cfg(unix)]
    #[test]
    fn command_failure_reports_diagnostics() {
        let (tmp, mut cache) = setup();
        let unit = unit(tmp.path());
        let script = "cat >/dev/null; echo \"$0:3:7: error: unexpected token\" >&2; exit 1";
        let tc = CommandToolchain::new("sh", vec!["-c".to_string(), script.to_string()]);
        let err = tc.compile(&mut cache, &unit).unwrap_err();
        let CompileError::Diagnostics(diags) = err else {
            panic!("expected diagnostics, got {err:?}");
        };
        assert_eq!(diags.len(), 1);
        let loc = diags[0].location.as_ref().unwrap();
        assert_eq!(loc.file, unit.source);
        assert_eq!((loc.line, loc.column), (Some(3), Some(7)));
        assert_eq!(diags[0].message, "unexpected token");
        assert!(!unit.output.exists());
    }

    #[test]
    fn missing_program_is_toolchain_error() {
        let (tmp, mut cache) = setup();
        let tc = CommandToolchain::new("trellis-no-such-transpiler", vec![]);
        let err = tc.compile(&mut cache, &unit(tmp.path())).unwrap_err();
        assert!(matches!(err, CompileError::Toolchain { .. }));
    }

    #[test]
    fn parse_severities_and_notes() {
        let stderr = "src/a.ts:1:2: warning: unused\n  declared here\nsrc/b.ts:4:1: missing semicolon\n";
        let diags = parse_diagnostics(stderr, Path::new("x.ts"));
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(diags[0].notes, vec!["declared here"]);
        assert_eq!(diags[1].severity, Severity::Error);
        assert_eq!(diags[1].message, "missing semicolon");
    }

    #[test]
    fn parse_note_and_help() {
        let stderr = "src/a.ts:3:1: note: inferred as string\nsrc/a.ts:3:1: help: add a type annotation\n";
        let diags = parse_diagnostics(stderr, Path::new("x.ts"));
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].severity, Severity::Note);
        assert_eq!(diags[1].severity, Severity::Help);
        assert_eq!(diags[1].message, "add a type annotation");
    }

    #[test]
    fn unstructured_stderr_falls_back() {
        let diags = parse_diagnostics("boom\n", Path::new("x.ts"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "boom");
        assert_eq!(diags[0].location.as_ref().unwrap().file, Path::new("x.ts"));
    }

    #[test]
    fn windows_drive_paths_parse() {
        let diags = parse_diagnostics("C:\\w\\a.ts:10:5: bad\n", Path::new("x.ts"));
        let loc = diags[0].location.as_ref().unwrap();
        assert_eq!(loc.file, Path::new("C:\\w\\a.ts"));
        assert_eq!(loc.line, Some(10));
    }
}
