//! Scenario test helpers for Trellis.
//!
//! [`FixtureWorkspace`] lays out a throwaway workspace on disk and opens
//! build sessions on it. [`CountingToolchain`] records every file it is
//! asked to compile, so tests can assert exactly which files a pass
//! touched.

#![warn(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use trellis_build::{BuildSession, CompileError, CompileUnit, EventLog, Toolchain};
use trellis_cache::CompilerHost;
use trellis_config::EnvOverrides;
use trellis_diagnostics::Diagnostic;

/// Sources containing this marker fail to compile.
pub const FAIL_MARKER: &str = "@@compile-error";

/// A toolchain that copies sources through and remembers what it compiled.
///
/// Clones share the same record.
#[derive(Debug, Clone)]
pub struct CountingToolchain {
    identity: String,
    compiled: Arc<Mutex<Vec<PathBuf>>>,
    delay: Duration,
}

impl CountingToolchain {
    /// A toolchain reporting `identity` in the compiler fingerprint.
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            compiled: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    /// Makes every compile call take at least `delay`, so tests can act
    /// while a pass is running. The call is recorded before the wait.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of compile calls so far.
    pub fn count(&self) -> usize {
        self.record().len()
    }

    /// Every source compiled so far, in call order.
    pub fn compiled(&self) -> Vec<PathBuf> {
        self.record().clone()
    }

    /// Returns and forgets the sources compiled so far.
    pub fn take(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.record())
    }

    fn record(&self) -> std::sync::MutexGuard<'_, Vec<PathBuf>> {
        self.compiled.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Toolchain for CountingToolchain {
    fn identity(&self) -> String {
        format!("counting-{}", self.identity)
    }

    fn compile(&self, host: &mut dyn CompilerHost, unit: &CompileUnit) -> Result<(), CompileError> {
        self.record().push(unit.source.clone());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let text = host.read_file(&unit.source)?;
        if let Some(line) = text.lines().position(|l| l.contains(FAIL_MARKER)) {
            return Err(CompileError::Diagnostics(vec![Diagnostic::error(
                "unexpected compile error marker",
            )
            .at(&unit.source, Some(line as u32 + 1), Some(1))]));
        }
        host.write_file(&unit.output, &text, Some(&unit.source))?;
        Ok(())
    }
}

/// A workspace in a temporary directory.
///
/// The root gets a `.git` folder so workspace discovery never walks above
/// it.
pub struct FixtureWorkspace {
    _tmp: TempDir,
    root: PathBuf,
}

impl FixtureWorkspace {
    /// An empty workspace.
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create temp dir");
        let root = fs::canonicalize(tmp.path()).expect("canonicalize temp dir");
        fs::create_dir(root.join(".git")).expect("create .git");
        Self { _tmp: tmp, root }
    }

    /// A single-package workspace named `name`.
    pub fn single(name: &str) -> Self {
        Self::new().with_file(
            "package.json",
            &format!(r#"{{"name": "{name}", "version": "1.0.0", "trellis": {{}}}}"#),
        )
    }

    /// A monorepo with members under `modules/`. Each member is a framework
    /// module depending on the comma-separated names next to it.
    pub fn mono(name: &str, members: &[(&str, &str)]) -> Self {
        let mut ws = Self::new().with_file(
            "package.json",
            &format!(r#"{{"name": "{name}", "workspaces": ["modules/*"]}}"#),
        );
        for (member, deps) in members {
            let deps: Vec<String> = deps
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(|d| format!(r#""{d}": "*""#))
                .collect();
            ws = ws.with_file(
                &format!("modules/{member}/package.json"),
                &format!(
                    r#"{{"name": "{member}", "trellis": {{}}, "dependencies": {{{}}}}}"#,
                    deps.join(", ")
                ),
            );
        }
        ws
    }

    /// Adds a file, creating parent folders.
    pub fn with_file(self, rel: &str, content: &str) -> Self {
        self.write(rel, content);
        self
    }

    /// Writes a file relative to the root.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent folders");
        }
        fs::write(&path, content).expect("write fixture file");
    }

    /// Deletes a file relative to the root.
    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.path(rel)).expect("remove fixture file");
    }

    /// The workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// An absolute path under the root.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Opens a session on the root package using `toolchain`.
    pub fn session(&self, toolchain: &CountingToolchain) -> BuildSession {
        self.session_in(".", toolchain)
    }

    /// Opens a session on the package at `folder` using `toolchain`.
    pub fn session_in(&self, folder: &str, toolchain: &CountingToolchain) -> BuildSession {
        BuildSession::open(
            Some(&self.path(folder)),
            EnvOverrides::default(),
            EventLog::new(1024),
        )
        .expect("open build session")
        .with_toolchain(Box::new(toolchain.clone()))
    }

    /// Output path of `rel` in module `module` for `session`.
    pub fn output(&self, session: &BuildSession, module: &str, rel: &str) -> PathBuf {
        session
            .context()
            .build
            .output_folder
            .join("node_modules")
            .join(module)
            .join(rel)
    }
}

impl Default for FixtureWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
