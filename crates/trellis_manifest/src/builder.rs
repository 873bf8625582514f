//! Manifest construction and change detection.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use trellis_cache::SourceHasher;
use trellis_config::Profile;
use trellis_context::{ManifestContext, Workspace};

use crate::delta::{Invalidation, InvalidationHint, ManifestDelta, ModuleDelta};
use crate::error::ManifestError;
use crate::graph::{DiscoveredModule, ModuleGraph};
use crate::model::{output_path_for, FileRole, ManifestFile, ManifestModule, ModuleManifest};
use crate::scan::scan_module;

/// The result of a scan: the new manifest and how it differs from the previous one.
#[derive(Debug, Clone)]
pub struct ManifestScan {
    /// The freshly built manifest.
    pub manifest: ModuleManifest,
    /// Changes relative to the previous manifest.
    pub delta: ManifestDelta,
}

/// Builds manifests for one context and build purpose.
pub struct ManifestBuilder<'a> {
    ctx: &'a ManifestContext,
    workspace: &'a Workspace,
    purpose: Profile,
}

impl<'a> ManifestBuilder<'a> {
    /// Creates a builder.
    pub fn new(ctx: &'a ManifestContext, workspace: &'a Workspace, purpose: Profile) -> Self {
        Self {
            ctx,
            workspace,
            purpose,
        }
    }

    /// Scans every module and diffs the result against `previous`.
    #[tracing::instrument(skip_all, fields(main = %self.ctx.main.name))]
    pub fn build(
        &self,
        previous: Option<&ModuleManifest>,
        hint: InvalidationHint,
    ) -> Result<ManifestScan, ManifestError> {
        let graph = ModuleGraph::discover(self.ctx, self.workspace, self.purpose)?;
        let mut manifest = ModuleManifest::empty(self.ctx, 0);
        for module in graph.iter() {
            let built = self.build_module(module)?;
            manifest.modules.insert(built.name.clone(), built);
        }

        let delta = diff(&manifest, previous, hint);
        manifest.generated_at = match previous {
            Some(prev) if delta.is_empty() && same_module_set(prev, &manifest) => prev.generated_at,
            _ => now_ms(),
        };
        tracing::debug!(
            modules = manifest.modules.len(),
            dirty = delta.dirty_count(),
            removed = delta.removed_count(),
            "manifest scanned"
        );
        Ok(ManifestScan { manifest, delta })
    }

    fn build_module(&self, module: &DiscoveredModule) -> Result<ManifestModule, ManifestError> {
        let scanned = scan_module(&module.dir)?;
        let candidates: Vec<(FileRole, _)> = scanned
            .into_iter()
            .flat_map(|(role, files)| files.into_iter().map(move |f| (role, f)))
            .collect();

        let fingerprinted: Vec<(FileRole, ManifestFile)> = candidates
            .into_par_iter()
            .filter_map(|(role, file)| {
                let abs = module.dir.join(&file.path);
                let fingerprint = if file.file_type.is_source() {
                    SourceHasher::hash_file(&abs).ok().map(|h| h.to_string())
                } else {
                    SourceHasher::probe_stamp(&abs)
                };
                let Some(fingerprint) = fingerprint else {
                    tracing::debug!(file = %abs.display(), "file vanished during scan");
                    return None;
                };
                Some((
                    role,
                    ManifestFile {
                        path: file.path,
                        file_type: file.file_type,
                        fingerprint,
                    },
                ))
            })
            .collect();

        let mut files: BTreeMap<FileRole, Vec<ManifestFile>> = BTreeMap::new();
        for (role, file) in fingerprinted {
            files.entry(role).or_default().push(file);
        }

        Ok(ManifestModule {
            name: module.name.clone(),
            version: module.descriptor.version.clone(),
            source: self.workspace.strip_root(&module.dir),
            output: output_path_for(&module.name),
            profiles: module.descriptor.profiles(),
            local: module.local,
            workspace: module.workspace,
            prod: module.prod,
            dependencies: module.dependencies.clone(),
            descriptor_hash: module.descriptor_hash,
            files,
        })
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn same_module_set(a: &ModuleManifest, b: &ModuleManifest) -> bool {
    a.modules.keys().eq(b.modules.keys())
}

/// Computes the delta between a new manifest and the previous one.
fn diff(
    current: &ModuleManifest,
    previous: Option<&ModuleManifest>,
    hint: InvalidationHint,
) -> ManifestDelta {
    let mut modules: BTreeMap<String, ModuleDelta> = BTreeMap::new();
    // Files present in both manifests, per module; candidates for invalidation.
    let mut surviving: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut transformer_touched = false;

    for (name, module) in &current.modules {
        let old = previous.and_then(|p| p.modules.get(name));
        let mut delta = ModuleDelta::default();
        match old {
            None => delta.added = module.all_files().map(|(_, f)| f.path.clone()).collect(),
            Some(old) => {
                let cs = SourceHasher::detect_changes(&module.fingerprints(), &old.fingerprints());
                let mut survivors = cs.unchanged_files;
                survivors.extend(cs.modified_files.iter().cloned());
                if old.descriptor_hash != module.descriptor_hash {
                    delta.changed.extend(survivors.iter().cloned());
                }
                delta.added = cs.new_files;
                delta.changed.extend(cs.modified_files);
                delta.removed = cs.deleted_files;
                surviving.insert(name.clone(), survivors);

                transformer_touched |= delta
                    .added
                    .iter()
                    .chain(&delta.changed)
                    .any(|p| is_transformer(module, p))
                    || delta.removed.iter().any(|p| is_transformer(old, p));
            }
        }
        if old.is_none() && module.has_transformers() && previous.is_some() {
            transformer_touched = true;
        }
        modules.insert(name.clone(), delta);
    }

    if let Some(prev) = previous {
        for (name, old) in &prev.modules {
            if current.modules.contains_key(name) {
                continue;
            }
            if old.has_transformers() {
                transformer_touched = true;
            }
            modules.insert(
                name.clone(),
                ModuleDelta {
                    removed: old.all_files().map(|(_, f)| f.path.clone()).collect(),
                    ..Default::default()
                },
            );
        }
    }

    let invalidation = if hint == InvalidationHint::Compiler {
        for (name, survivors) in &surviving {
            if let Some(delta) = modules.get_mut(name) {
                delta.changed.extend(survivors.iter().cloned());
            }
        }
        Invalidation::Compiler
    } else if transformer_touched {
        let affected = transformer_scoped(current, previous);
        for name in &affected {
            if let (Some(delta), Some(survivors)) = (modules.get_mut(name), surviving.get(name)) {
                delta.changed.extend(survivors.iter().cloned());
            }
        }
        Invalidation::Transformers { modules: affected }
    } else {
        Invalidation::None
    };

    for delta in modules.values_mut() {
        delta.normalize();
    }
    modules.retain(|_, d| !d.is_empty());
    ManifestDelta {
        modules,
        invalidation,
    }
}

fn is_transformer(module: &ManifestModule, path: &str) -> bool {
    module
        .file(path)
        .is_some_and(|(role, _)| role == FileRole::Transformer)
}

/// Modules whose dependency closure contains transformer files, now or before.
fn transformer_scoped(
    current: &ModuleManifest,
    previous: Option<&ModuleManifest>,
) -> BTreeSet<String> {
    let had_transformers = |name: &str| {
        current
            .modules
            .get(name)
            .is_some_and(ManifestModule::has_transformers)
            || previous
                .and_then(|p| p.modules.get(name))
                .is_some_and(ManifestModule::has_transformers)
    };
    current
        .modules
        .keys()
        .filter(|name| {
            let mut scope: BTreeSet<String> = current.dependency_closure(name);
            if let Some(prev) = previous {
                scope.extend(prev.dependency_closure(name));
            }
            scope.iter().any(|m| had_transformers(m))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use trellis_config::{BuildSettings, EnvOverrides};
    use trellis_context::{resolve_context, PathResolver};

    struct Fixture {
        _tmp: tempfile::TempDir,
        root: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let root = fs::canonicalize(tmp.path()).unwrap();
            fs::create_dir(root.join(".git")).unwrap();
            Self { _tmp: tmp, root }
        }

        fn write(&self, rel: &str, content: &str) {
            let p = self.root.join(rel);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, content).unwrap();
        }

        fn scan(&self, folder: &str, previous: Option<&ModuleManifest>, hint: InvalidationHint) -> ManifestScan {
            let resolver = PathResolver::new();
            let folder = self.root.join(folder);
            let ctx = resolve_context(
                &resolver,
                Some(folder.as_path()),
                &EnvOverrides::default(),
                &BuildSettings::default(),
            )
            .unwrap();
            let ws = resolver.resolve_workspace(&ctx.workspace.path).unwrap();
            ManifestBuilder::new(&ctx, &ws, Profile::Build)
                .build(previous, hint)
                .unwrap()
        }
    }

    fn single() -> Fixture {
        let f = Fixture::new();
        f.write("package.json", r#"{"name": "app", "version": "1.0.0", "trellis": {}}"#);
        f.write("index.ts", "export * from './src/a';");
        f.write("src/a.ts", "export const a = 1;");
        f.write("src/b.ts", "export const b = 2;");
        f.write("resources/logo.png", "PNG");
        f
    }

    fn mono() -> Fixture {
        let f = Fixture::new();
        f.write("package.json", r#"{"name": "shop", "workspaces": ["modules/*"]}"#);
        f.write(
            "modules/app/package.json",
            r#"{"name": "app", "trellis": {}, "dependencies": {"core": "*"}}"#,
        );
        f.write("modules/app/src/main.ts", "import 'core';");
        f.write("modules/core/package.json", r#"{"name": "core", "trellis": {}}"#);
        f.write("modules/core/src/core.ts", "export {};");
        f.write("modules/core/support/transformer.ts", "export default () => {};");
        f.write("modules/other/package.json", r#"{"name": "other", "trellis": {}}"#);
        f.write("modules/other/src/o.ts", "export {};");
        f
    }

    #[test]
    fn first_scan_adds_everything() {
        let f = single();
        let scan = f.scan(".", None, InvalidationHint::None);
        let app = &scan.manifest.modules["app"];
        assert_eq!(app.source, PathBuf::from(""));
        assert_eq!(app.output, PathBuf::from("node_modules/app"));
        assert_eq!(app.file_count(), 4);
        let d = scan.delta.module("app").unwrap();
        assert_eq!(
            d.added,
            vec!["index.ts", "resources/logo.png", "src/a.ts", "src/b.ts"]
        );
        assert!(scan.manifest.validate().is_ok());
    }

    #[test]
    fn fingerprints_by_type() {
        let f = single();
        let scan = f.scan(".", None, InvalidationHint::None);
        let app = &scan.manifest.modules["app"];
        let (_, src) = app.file("src/a.ts").unwrap();
        assert_eq!(src.fingerprint.len(), 32);
        let (role, logo) = app.file("resources/logo.png").unwrap();
        assert_eq!(role, FileRole::Resources);
        assert!(logo.fingerprint.starts_with("3-"));
    }

    #[test]
    fn rescan_without_changes_is_identical() {
        let f = single();
        let first = f.scan(".", None, InvalidationHint::None);
        let second = f.scan(".", Some(&first.manifest), InvalidationHint::None);
        assert!(second.delta.is_empty());
        assert_eq!(second.delta.invalidation, Invalidation::None);
        assert_eq!(
            serde_json::to_string_pretty(&first.manifest).unwrap(),
            serde_json::to_string_pretty(&second.manifest).unwrap()
        );
    }

    #[test]
    fn whitespace_edit_is_changed() {
        let f = single();
        let first = f.scan(".", None, InvalidationHint::None);
        f.write("src/a.ts", "export const a = 1; ");
        let second = f.scan(".", Some(&first.manifest), InvalidationHint::None);
        let d = second.delta.module("app").unwrap();
        assert_eq!(d.changed, vec!["src/a.ts"]);
        assert!(d.added.is_empty() && d.removed.is_empty());
    }

    #[test]
    fn deletion_is_removed() {
        let f = single();
        let first = f.scan(".", None, InvalidationHint::None);
        fs::remove_file(f.root.join("src/b.ts")).unwrap();
        let second = f.scan(".", Some(&first.manifest), InvalidationHint::None);
        let d = second.delta.module("app").unwrap();
        assert_eq!(d.removed, vec!["src/b.ts"]);
        assert!(d.changed.is_empty());
    }

    #[test]
    fn descriptor_change_marks_module_changed() {
        let f = single();
        let first = f.scan(".", None, InvalidationHint::None);
        f.write("package.json", r#"{"name": "app", "version": "1.0.1", "trellis": {}}"#);
        let second = f.scan(".", Some(&first.manifest), InvalidationHint::None);
        assert_eq!(second.delta.module("app").unwrap().changed.len(), 4);
    }

    #[test]
    fn compiler_hint_marks_all_existing_changed() {
        let f = single();
        let first = f.scan(".", None, InvalidationHint::None);
        f.write("src/c.ts", "export const c = 3;");
        let second = f.scan(".", Some(&first.manifest), InvalidationHint::Compiler);
        let d = second.delta.module("app").unwrap();
        assert_eq!(d.added, vec!["src/c.ts"]);
        assert_eq!(d.changed.len(), 4);
        assert_eq!(second.delta.invalidation, Invalidation::Compiler);
        assert_ne!(second.manifest.generated_at, 0);
    }

    #[test]
    fn transformer_change_invalidates_dependents_only() {
        let f = mono();
        let first = f.scan(".", None, InvalidationHint::None);
        assert!(first.manifest.modules.contains_key("core"));
        f.write("modules/core/support/transformer.ts", "export default (x) => x;");
        let second = f.scan(".", Some(&first.manifest), InvalidationHint::None);

        let expected: BTreeSet<String> = ["app", "core"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            second.delta.invalidation,
            Invalidation::Transformers {
                modules: expected
            }
        );
        assert_eq!(second.delta.module("app").unwrap().changed, vec!["src/main.ts"]);
        assert_eq!(second.delta.module("core").unwrap().changed.len(), 2);
        assert!(second.delta.module("other").is_none());
    }

    #[test]
    fn vanished_module_removes_all_files() {
        let f = mono();
        let first = f.scan(".", None, InvalidationHint::None);
        fs::remove_dir_all(f.root.join("modules/other")).unwrap();
        let second = f.scan(".", Some(&first.manifest), InvalidationHint::None);
        let d = second.delta.module("other").unwrap();
        assert_eq!(d.removed, vec!["src/o.ts"]);
        assert!(!second.manifest.modules.contains_key("other"));
    }

    #[test]
    fn transformer_files_get_their_role() {
        let f = mono();
        let scan = f.scan(".", None, InvalidationHint::None);
        let core = &scan.manifest.modules["core"];
        assert!(core.has_transformers());
        assert_eq!(
            core.files[&FileRole::Transformer][0].path,
            "support/transformer.ts"
        );
        assert_eq!(core.source, Path::new("modules/core"));
    }
}
