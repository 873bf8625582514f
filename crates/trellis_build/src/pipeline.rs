//! One incremental build pass.
//!
//! A pass runs in a fixed order:
//!
//! 1. the caller makes sure it is the only writer (the compiler server);
//! 2. [`prepare_compiler`] records the compiler fingerprint, and a change
//!    empties the on-disk cache;
//! 3. the context is refreshed and the manifest scanned;
//! 4. transformer files whose source changed are compiled first;
//! 5. the delta comes out of the scan;
//! 6. a compiler change empties the output folder, a transformer change
//!    empties the output folders of the modules it reaches;
//! 7. the manifest is persisted;
//! 8. dirty files are compiled or copied and removed files are deleted.
//!
//! Files that fail to compile are persisted with an empty fingerprint so the
//! next pass picks them up again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use trellis_cache::{normalize_path, preprocessor_for, CompilerHost, SourceCache};
use trellis_config::{BuildSettings, EnvOverrides};
use trellis_context::{load_context, ManifestContext, PathResolver, Workspace};
use trellis_diagnostics::{Diagnostic, Severity};
use trellis_manifest::{
    load_previous, persist, strip_for_prod, write_manifest, FileRole, Invalidation,
    InvalidationHint, ManifestBuilder, ManifestDelta, ManifestScan, ModuleManifest,
};

use crate::error::BuildError;
use crate::events::{EventLog, EventPayload};
use crate::output::{clear_dir, copy_resource, prepare_compiler, remove_output};
use crate::toolchain::{toolchain_for, CompileUnit, Toolchain};

/// How often, in files, compile progress is published.
const PROGRESS_EVERY: usize = 25;

/// Whether every dirty file compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// All files compiled.
    Success,
    /// At least one file failed to compile.
    Failed,
}

/// Result of one build pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    /// Overall status.
    pub status: BuildStatus,
    /// What the scan found.
    pub delta: ManifestDelta,
    /// The compiler fingerprint changed this pass.
    pub compiler_changed: bool,
    /// Source files compiled, transformers included.
    pub compiled: usize,
    /// Non-source files copied.
    pub copied: usize,
    /// Outputs deleted for removed files.
    pub removed: usize,
    /// Source files that failed to compile.
    pub failed: Vec<PathBuf>,
    /// Diagnostics reported during the pass.
    pub diagnostics: Vec<Diagnostic>,
    /// Wall-clock duration of the pass.
    pub duration_ms: u64,
}

impl BuildOutcome {
    /// Returns `true` if the pass succeeded.
    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Success
    }
}

/// What `exec` should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecTarget {
    /// Compiled file to run.
    pub output: PathBuf,
    /// Program that runs it.
    pub runtime: String,
    /// Arguments placed before the output path.
    pub args: Vec<String>,
}

/// Per-pass counters.
#[derive(Default)]
struct PassReport {
    compiled: usize,
    copied: usize,
    removed: usize,
    failed: Vec<(String, String, PathBuf)>,
    diagnostics: Vec<Diagnostic>,
}

/// Long-lived state for building one workspace target.
pub struct BuildSession {
    folder: Option<PathBuf>,
    env: EnvOverrides,
    resolver: PathResolver,
    ctx: ManifestContext,
    settings: BuildSettings,
    workspace: Arc<Workspace>,
    cache: SourceCache,
    toolchain: Box<dyn Toolchain>,
    custom_toolchain: bool,
    events: Arc<EventLog>,
    previous: Option<ModuleManifest>,
}

impl BuildSession {
    /// Resolves the target at `folder` (or the current directory) and opens
    /// a session for it.
    pub fn open(
        folder: Option<&Path>,
        env: EnvOverrides,
        events: Arc<EventLog>,
    ) -> Result<Self, BuildError> {
        let resolver = PathResolver::new();
        let (ctx, settings) = load_context(&resolver, folder, &env)?;
        let workspace = resolver.resolve_workspace(&ctx.workspace.path)?;
        let cache = SourceCache::new(
            &ctx.build.cache_folder,
            preprocessor_for(settings.toolchain.preprocess),
        );
        let toolchain = toolchain_for(&settings.toolchain);
        let previous = load_previous(&ctx.manifest_path());
        tracing::debug!(
            main = %ctx.main.name,
            root = %ctx.workspace.path.display(),
            previous = previous.is_some(),
            "build session opened"
        );
        Ok(Self {
            folder: folder.map(Path::to_path_buf),
            env,
            resolver,
            ctx,
            settings,
            workspace,
            cache,
            toolchain,
            custom_toolchain: false,
            events,
            previous,
        })
    }

    /// Replaces the configured toolchain.
    pub fn with_toolchain(mut self, toolchain: Box<dyn Toolchain>) -> Self {
        self.toolchain = toolchain;
        self.custom_toolchain = true;
        self
    }

    /// The resolved context.
    pub fn context(&self) -> &ManifestContext {
        &self.ctx
    }

    /// The loaded build settings.
    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// The manifest of the last pass, or the one found on disk at open.
    pub fn manifest(&self) -> Option<&ModuleManifest> {
        self.previous.as_ref()
    }

    /// The event log passes publish to.
    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// Runs one incremental pass.
    #[tracing::instrument(skip_all, fields(main = %self.ctx.main.name))]
    pub fn run(&mut self) -> Result<BuildOutcome, BuildError> {
        let started = Instant::now();
        self.refresh()?;

        let compiler_changed =
            prepare_compiler(&self.ctx, &self.settings, self.toolchain.as_ref())?;
        if compiler_changed {
            self.cache.clear_disk()?;
        }

        self.progress("scan", 0, 1);
        let hint = if compiler_changed {
            InvalidationHint::Compiler
        } else {
            InvalidationHint::None
        };
        let ManifestScan {
            mut manifest,
            delta,
        } = ManifestBuilder::new(&self.ctx, &self.workspace, self.settings.build.profile)
            .build(self.previous.as_ref(), hint)?;
        self.progress("scan", 1, 1);

        let mut report = PassReport::default();
        let transformers = self.compile_transformers(&manifest, &mut report)?;

        match &delta.invalidation {
            Invalidation::Compiler => clear_dir(&self.ctx.build.output_folder)?,
            Invalidation::Transformers { modules } => {
                for name in modules {
                    if let Some(module) = manifest.modules.get(name) {
                        clear_dir(&manifest.module_output_dir(module))?;
                    }
                }
            }
            Invalidation::None => {}
        }

        persist(&manifest)?;

        self.remove_deleted(&delta, &mut report)?;
        self.compile_dirty(&manifest, &delta, &transformers, &mut report)?;

        if !report.failed.is_empty() {
            for (module, file, _) in &report.failed {
                if let Some(m) = manifest.modules.get_mut(module) {
                    m.clear_fingerprint(file);
                }
            }
            persist(&manifest)?;
        }
        self.collect_garbage(&manifest);

        for diag in &report.diagnostics {
            self.events.publish(EventPayload::from_diagnostic(diag));
        }
        let status = if report.failed.is_empty() {
            BuildStatus::Success
        } else {
            BuildStatus::Failed
        };
        let outcome = BuildOutcome {
            status,
            delta,
            compiler_changed,
            compiled: report.compiled,
            copied: report.copied,
            removed: report.removed,
            failed: report.failed.into_iter().map(|(_, _, path)| path).collect(),
            diagnostics: report.diagnostics,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.previous = Some(manifest);

        tracing::info!(
            status = ?outcome.status,
            compiled = outcome.compiled,
            copied = outcome.copied,
            removed = outcome.removed,
            failed = outcome.failed.len(),
            duration_ms = outcome.duration_ms,
            "build finished"
        );
        self.events.publish(EventPayload::log(
            if outcome.is_success() {
                Severity::Note
            } else {
                Severity::Error
            },
            format!(
                "build {}: {} compiled, {} copied, {} removed, {} failed",
                if outcome.is_success() { "succeeded" } else { "failed" },
                outcome.compiled,
                outcome.copied,
                outcome.removed,
                outcome.failed.len()
            ),
        ));
        Ok(outcome)
    }

    /// Drops in-memory cache state and cached workspace resolution, then
    /// reloads the context and the manifest from disk. The on-disk cache is
    /// kept.
    pub fn restart(&mut self) -> Result<(), BuildError> {
        self.cache.reset();
        self.resolver.clear();
        self.refresh()?;
        self.previous = load_previous(&self.ctx.manifest_path());
        tracing::info!(main = %self.ctx.main.name, "session restarted");
        Ok(())
    }

    /// Writes the manifest of the last pass to `output`, stripped for
    /// production when `prod` is set. Runs a pass first when there is no
    /// manifest yet. Returns the path written.
    pub fn write_manifest(
        &mut self,
        prod: bool,
        output: Option<&Path>,
    ) -> Result<PathBuf, BuildError> {
        if self.previous.is_none() {
            self.run()?;
        }
        let manifest = self
            .previous
            .as_ref()
            .ok_or_else(|| trellis_common::InternalError::new("no manifest after build pass"))?;
        let path = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_manifest_output(&self.ctx, prod));
        let written = if prod {
            strip_for_prod(manifest)
        } else {
            manifest.clone()
        };
        write_manifest(&written, &path)?;
        Ok(path)
    }

    /// Finds the compiled output of `file` and the runtime configured for it.
    ///
    /// Uses the manifest of the last pass; callers build first.
    pub fn exec_target(&self, file: &Path) -> Result<ExecTarget, BuildError> {
        let file = if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.ctx.main.folder.join(file)
        };
        let file = normalize_path(&std::fs::canonicalize(&file).unwrap_or(file));
        let manifest = self
            .previous
            .as_ref()
            .ok_or_else(|| BuildError::UnknownFile(file.clone()))?;
        let output = manifest
            .modules
            .values()
            .flat_map(|m| m.all_files().map(move |(_, f)| (m, f)))
            .find(|(m, f)| manifest.source_path(m, f) == file)
            .map(|(m, f)| manifest.output_path(m, f))
            .ok_or(BuildError::UnknownFile(file))?;
        Ok(ExecTarget {
            output,
            runtime: self.settings.exec.runtime.clone(),
            args: self.settings.exec.args.clone(),
        })
    }

    fn refresh(&mut self) -> Result<(), BuildError> {
        let (ctx, settings) = load_context(&self.resolver, self.folder.as_deref(), &self.env)?;
        let workspace = self.resolver.resolve_workspace(&ctx.workspace.path)?;
        let cache_moved = ctx.build.cache_folder != self.ctx.build.cache_folder;
        let preprocess_changed = settings.toolchain.preprocess != self.settings.toolchain.preprocess;
        if cache_moved || preprocess_changed {
            tracing::debug!(cache_moved, preprocess_changed, "recreating source cache");
            self.cache = SourceCache::new(
                &ctx.build.cache_folder,
                preprocessor_for(settings.toolchain.preprocess),
            );
        }
        if !self.custom_toolchain && settings.toolchain != self.settings.toolchain {
            self.toolchain = toolchain_for(&settings.toolchain);
        }
        self.ctx = ctx;
        self.settings = settings;
        self.workspace = workspace;
        Ok(())
    }

    /// Compiles transformer sources whose content changed. Returns every
    /// source attempted and whether it compiled.
    fn compile_transformers(
        &mut self,
        manifest: &ModuleManifest,
        report: &mut PassReport,
    ) -> Result<HashMap<PathBuf, bool>, BuildError> {
        let mut attempted = HashMap::new();
        for module in manifest.modules.values() {
            let Some(files) = module.files.get(&FileRole::Transformer) else {
                continue;
            };
            for file in files.iter().filter(|f| f.file_type.is_source()) {
                let source = manifest.source_path(module, file);
                if matches!(self.cache.hash_changed(&source, None), Ok(false)) {
                    continue;
                }
                self.cache.unload(&source, false)?;
                let unit = CompileUnit {
                    module: module.name.clone(),
                    source: source.clone(),
                    output: manifest.output_path(module, file),
                    file_type: file.file_type,
                    role: FileRole::Transformer,
                };
                let ok = self.compile_unit(&unit, report);
                if !ok {
                    report
                        .failed
                        .push((module.name.clone(), file.path.clone(), source.clone()));
                }
                attempted.insert(normalize_path(&source), ok);
            }
        }
        if !attempted.is_empty() {
            tracing::debug!(count = attempted.len(), "transformers compiled");
        }
        Ok(attempted)
    }

    fn remove_deleted(
        &mut self,
        delta: &ManifestDelta,
        report: &mut PassReport,
    ) -> Result<(), BuildError> {
        let Some(previous) = self.previous.as_ref() else {
            return Ok(());
        };
        for (name, changes) in &delta.modules {
            let Some(old) = previous.modules.get(name) else {
                continue;
            };
            for path in &changes.removed {
                let Some((_, file)) = old.file(path) else {
                    continue;
                };
                if remove_output(&previous.output_path(old, file))? {
                    report.removed += 1;
                }
                self.cache.unload(&previous.source_path(old, file), true)?;
            }
        }
        Ok(())
    }

    fn compile_dirty(
        &mut self,
        manifest: &ModuleManifest,
        delta: &ManifestDelta,
        transformers: &HashMap<PathBuf, bool>,
        report: &mut PassReport,
    ) -> Result<(), BuildError> {
        let total = delta.dirty_count();
        let mut done = 0;
        self.progress("compile", done, total);

        for (name, changes) in &delta.modules {
            let Some(module) = manifest.modules.get(name) else {
                continue;
            };
            for path in changes.dirty() {
                let Some((role, file)) = module.file(path) else {
                    continue;
                };
                let source = manifest.source_path(module, file);
                let output = manifest.output_path(module, file);
                let fail = |report: &mut PassReport| {
                    report
                        .failed
                        .push((name.clone(), path.clone(), source.clone()));
                };

                if !file.file_type.is_source() {
                    match copy_resource(&source, &output) {
                        Ok(()) => report.copied += 1,
                        Err(e) => {
                            report
                                .diagnostics
                                .push(Diagnostic::error(e.to_string()).at(&source, None, None));
                            fail(report);
                        }
                    }
                } else {
                    // Transformers compiled earlier this pass are rewritten from
                    // the cache; the output folder may have been cleared since.
                    let rewritten = match transformers.get(&normalize_path(&source)) {
                        Some(false) => true,
                        Some(true) => match self.cache.cached_output(&source) {
                            Some(text) => {
                                self.cache.write_file(&output, &text, Some(&source))?;
                                true
                            }
                            None => false,
                        },
                        None => false,
                    };
                    if !rewritten {
                        self.cache.unload(&source, false)?;
                        let unit = CompileUnit {
                            module: name.clone(),
                            source: source.clone(),
                            output,
                            file_type: file.file_type,
                            role,
                        };
                        if !self.compile_unit(&unit, report) {
                            fail(report);
                        }
                    }
                }

                done += 1;
                if done % PROGRESS_EVERY == 0 {
                    self.progress("compile", done, total);
                }
            }
        }
        self.progress("compile", total, total);
        Ok(())
    }

    /// Compiles one unit, recording diagnostics. Returns `true` on success.
    fn compile_unit(&mut self, unit: &CompileUnit, report: &mut PassReport) -> bool {
        match self.toolchain.compile(&mut self.cache, unit) {
            Ok(()) => {
                report.compiled += 1;
                true
            }
            Err(e) => {
                tracing::debug!(file = %unit.source.display(), "compile failed: {e}");
                report.diagnostics.extend(e.into_diagnostics(&unit.source));
                false
            }
        }
    }

    fn collect_garbage(&self, manifest: &ModuleManifest) {
        let live: Vec<PathBuf> = manifest
            .modules
            .values()
            .flat_map(|m| {
                m.all_files()
                    .filter(|(_, f)| f.file_type.is_source())
                    .map(move |(_, f)| manifest.source_path(m, f))
            })
            .collect();
        match self.cache.gc(live.iter().map(PathBuf::as_path)) {
            Ok(0) => {}
            Ok(n) => tracing::debug!(removed = n, "cache entries collected"),
            Err(e) => tracing::warn!("cache garbage collection failed: {e}"),
        }
    }

    fn progress(&self, phase: &str, done: usize, total: usize) {
        self.events.publish(EventPayload::Progress {
            phase: phase.to_string(),
            done,
            total,
        });
    }
}

/// Scans the target at `folder` and writes its manifest without compiling.
///
/// Used by `manifest` when no compiler server runs. The build's own
/// manifest is never overwritten by default, since it must describe
/// compiled output.
pub fn generate_manifest(
    folder: Option<&Path>,
    env: &EnvOverrides,
    prod: bool,
    output: Option<&Path>,
) -> Result<PathBuf, BuildError> {
    let resolver = PathResolver::new();
    let (ctx, settings) = load_context(&resolver, folder, env)?;
    let workspace = resolver.resolve_workspace(&ctx.workspace.path)?;
    let ManifestScan { manifest, .. } =
        ManifestBuilder::new(&ctx, &workspace, settings.build.profile)
            .build(None, InvalidationHint::None)?;
    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_manifest_output(&ctx, prod));
    let written = if prod {
        strip_for_prod(&manifest)
    } else {
        manifest
    };
    write_manifest(&written, &path)?;
    Ok(path)
}

fn default_manifest_output(ctx: &ManifestContext, prod: bool) -> PathBuf {
    let name = if prod {
        "manifest.prod.json"
    } else {
        "manifest.json"
    };
    ctx.build.tool_folder.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileError;
    use crate::toolchain::PassthroughToolchain;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trellis_cache::{encode_path_key, ArtifactStore};
    use trellis_common::TRELLIS_VERSION;

    /// Upper-cases sources; fails on files containing `@@error`.
    struct Upper {
        calls: Arc<AtomicUsize>,
    }

    impl Toolchain for Upper {
        fn identity(&self) -> String {
            "upper".to_string()
        }

        fn compile(
            &self,
            host: &mut dyn CompilerHost,
            unit: &CompileUnit,
        ) -> Result<(), CompileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = host.read_file(&unit.source)?;
            if text.contains("@@error") {
                return Err(CompileError::Diagnostics(vec![Diagnostic::error(
                    "unexpected token",
                )
                .at(&unit.source, Some(1), Some(1))]));
            }
            host.write_file(&unit.output, &text.to_uppercase(), Some(&unit.source))?;
            Ok(())
        }
    }

    fn fixture() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::write(
            root.join("package.json"),
            r#"{"name": "app", "version": "1.0.0"}"#,
        )
        .unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("resources")).unwrap();
        std::fs::write(root.join("src/a.ts"), "export const a = 1;\n").unwrap();
        std::fs::write(root.join("src/b.ts"), "export const b = 2;\n").unwrap();
        std::fs::write(root.join("resources/logo.svg"), "<svg/>").unwrap();
        tmp
    }

    fn open(root: &Path) -> (BuildSession, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let session = BuildSession::open(Some(root), EnvOverrides::default(), EventLog::new(256))
            .unwrap()
            .with_toolchain(Box::new(Upper {
                calls: Arc::clone(&calls),
            }));
        (session, calls)
    }

    fn output(session: &BuildSession, rel: &str) -> PathBuf {
        session
            .context()
            .build
            .output_folder
            .join("node_modules/app")
            .join(rel)
    }

    fn source(session: &BuildSession, rel: &str) -> PathBuf {
        session.context().workspace.path.join(rel)
    }

    #[test]
    fn clean_build_compiles_and_copies() {
        let tmp = fixture();
        let (mut session, calls) = open(tmp.path());
        let outcome = session.run().unwrap();

        assert!(outcome.is_success());
        assert!(outcome.compiler_changed);
        assert_eq!(outcome.compiled, 2);
        assert_eq!(outcome.copied, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.delta.module("app").unwrap().added.len(), 3);
        assert_eq!(
            std::fs::read_to_string(output(&session, "src/a.js")).unwrap(),
            "EXPORT CONST A = 1;\n"
        );
        assert!(output(&session, "resources/logo.svg").exists());
        assert!(session.context().manifest_path().exists());
    }

    #[test]
    fn noop_rebuild_is_idempotent() {
        let tmp = fixture();
        let (mut session, calls) = open(tmp.path());
        session.run().unwrap();
        let manifest_path = session.context().manifest_path();
        let before = std::fs::read(&manifest_path).unwrap();

        let outcome = session.run().unwrap();
        assert!(outcome.delta.is_empty());
        assert!(!outcome.compiler_changed);
        assert_eq!(outcome.compiled, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(std::fs::read(&manifest_path).unwrap(), before);
    }

    #[test]
    fn reopened_session_resumes_from_disk() {
        let tmp = fixture();
        open(tmp.path()).0.run().unwrap();
        let (mut session, calls) = open(tmp.path());
        let outcome = session.run().unwrap();
        assert!(outcome.delta.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn edit_recompiles_only_that_file() {
        let tmp = fixture();
        let (mut session, calls) = open(tmp.path());
        session.run().unwrap();
        std::fs::write(tmp.path().join("src/a.ts"), "export const a = 10;\n").unwrap();

        let outcome = session.run().unwrap();
        assert_eq!(outcome.compiled, 1);
        assert_eq!(outcome.delta.module("app").unwrap().changed, vec!["src/a.ts"]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            std::fs::read_to_string(output(&session, "src/a.js")).unwrap(),
            "EXPORT CONST A = 10;\n"
        );
    }

    #[test]
    fn deletion_removes_output_and_cache_entry() {
        let tmp = fixture();
        let (mut session, _) = open(tmp.path());
        session.run().unwrap();
        let store = ArtifactStore::new(&session.context().build.cache_folder, TRELLIS_VERSION);
        let key = encode_path_key(&source(&session, "src/b.ts"));
        assert!(store.read_entry(&key).is_some());

        std::fs::remove_file(tmp.path().join("src/b.ts")).unwrap();
        let outcome = session.run().unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.delta.module("app").unwrap().removed, vec!["src/b.ts"]);
        assert!(!output(&session, "src/b.js").exists());
        assert!(store.read_entry(&key).is_none());
        assert!(session.manifest().unwrap().modules["app"].file("src/b.ts").is_none());
    }

    #[test]
    fn failed_file_is_retried_next_pass() {
        let tmp = fixture();
        std::fs::write(tmp.path().join("src/a.ts"), "@@error\n").unwrap();
        let (mut session, calls) = open(tmp.path());

        let outcome = session.run().unwrap();
        assert_eq!(outcome.status, BuildStatus::Failed);
        assert_eq!(outcome.failed, vec![source(&session, "src/a.ts")]);
        assert_eq!(outcome.diagnostics[0].message, "unexpected token");
        let on_disk = trellis_manifest::load_manifest(&session.context().manifest_path())
            .unwrap()
            .unwrap();
        assert_eq!(on_disk.modules["app"].file("src/a.ts").unwrap().1.fingerprint, "");

        let again = session.run().unwrap();
        assert_eq!(again.status, BuildStatus::Failed);
        assert_eq!(again.compiled, 0);

        std::fs::write(tmp.path().join("src/a.ts"), "export const a = 1;\n").unwrap();
        let fixed = session.run().unwrap();
        assert!(fixed.is_success());
        assert_eq!(fixed.compiled, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn toolchain_change_rebuilds_everything() {
        let tmp = fixture();
        let mut first = BuildSession::open(Some(tmp.path()), EnvOverrides::default(), EventLog::new(16))
            .unwrap()
            .with_toolchain(Box::new(PassthroughToolchain));
        first.run().unwrap();

        let (mut session, calls) = open(tmp.path());
        let outcome = session.run().unwrap();
        assert!(outcome.compiler_changed);
        assert_eq!(outcome.delta.invalidation, Invalidation::Compiler);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            std::fs::read_to_string(output(&session, "src/b.js")).unwrap(),
            "EXPORT CONST B = 2;\n"
        );
        assert!(output(&session, "resources/logo.svg").exists());
    }

    #[test]
    fn transformer_change_invalidates_module() {
        let tmp = fixture();
        std::fs::create_dir_all(tmp.path().join("support")).unwrap();
        std::fs::write(tmp.path().join("support/transformer.ts"), "v1\n").unwrap();
        let (mut session, calls) = open(tmp.path());
        let first = session.run().unwrap();
        assert_eq!(first.compiled, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        std::fs::write(tmp.path().join("support/transformer.ts"), "v2\n").unwrap();
        let outcome = session.run().unwrap();
        assert!(matches!(
            &outcome.delta.invalidation,
            Invalidation::Transformers { modules } if modules.contains("app")
        ));
        // The transformer compiles once; the two sources follow.
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(outcome.copied, 1);
        assert_eq!(
            std::fs::read_to_string(output(&session, "support/transformer.js")).unwrap(),
            "V2\n"
        );
        assert!(output(&session, "src/a.js").exists());
    }

    #[test]
    fn exec_target_maps_source_to_output() {
        let tmp = fixture();
        let (mut session, _) = open(tmp.path());
        session.run().unwrap();
        let target = session.exec_target(Path::new("src/a.ts")).unwrap();
        assert_eq!(target.output, output(&session, "src/a.js"));
        assert_eq!(target.runtime, "node");

        let err = session.exec_target(Path::new("src/missing.ts")).unwrap_err();
        assert!(matches!(err, BuildError::UnknownFile(_)));
    }

    #[test]
    fn prod_manifest_goes_to_tool_folder() {
        let tmp = fixture();
        let (mut session, _) = open(tmp.path());
        let path = session.write_manifest(true, None).unwrap();
        assert_eq!(
            path,
            session.context().build.tool_folder.join("manifest.prod.json")
        );
        let written = trellis_manifest::load_manifest(&path).unwrap().unwrap();
        assert_eq!(written.main_module, "app");
        assert!(output(&session, "src/a.js").exists());
    }

    #[test]
    fn standalone_manifest_does_not_touch_build_output() {
        let tmp = fixture();
        let custom = tmp.path().join("out/manifest.json");
        let path =
            generate_manifest(Some(tmp.path()), &EnvOverrides::default(), false, Some(&custom))
                .unwrap();
        assert_eq!(path, custom);
        let written = trellis_manifest::load_manifest(&path).unwrap().unwrap();
        assert_eq!(written.modules["app"].file_count(), 3);
        assert!(!tmp.path().join(".trellis_output").exists());
    }

    #[test]
    fn diagnostics_are_published_as_log_events() {
        let tmp = fixture();
        std::fs::write(tmp.path().join("src/b.ts"), "@@error\n").unwrap();
        let (mut session, _) = open(tmp.path());
        let mut logs = session
            .events()
            .subscribe(Some(crate::events::EventKind::Log));
        session.run().unwrap();
        let records = logs.drain();
        assert!(records.iter().any(|r| matches!(
            &r.payload,
            EventPayload::Log { message, location: Some(loc), .. }
                if message == "unexpected token" && loc.ends_with("b.ts:1:1")
        )));
        assert!(records.iter().any(|r| r.payload.to_string().contains("build failed")));
    }

    #[test]
    fn restart_keeps_disk_cache() {
        let tmp = fixture();
        let (mut session, calls) = open(tmp.path());
        session.run().unwrap();
        session.restart().unwrap();
        let outcome = session.run().unwrap();
        assert!(outcome.delta.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
