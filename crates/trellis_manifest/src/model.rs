//! Manifest data model.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use trellis_common::ContentHash;
use trellis_config::Profile;
use trellis_context::{BuildLayout, MainModule, ManifestContext, WorkspaceInfo};

/// The folder, relative to the output folder, that receives a module's output.
pub fn output_path_for(name: &str) -> PathBuf {
    Path::new("node_modules").join(name)
}

/// What a file is for within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    /// Root `index.*` / `__index__.*` entry points.
    Index,
    /// Library sources under `src/`.
    Src,
    /// Tests under `test/`.
    Test,
    /// Support code under `support/`.
    Support,
    /// Executables under `bin/`.
    Bin,
    /// Static assets under `resources/`.
    Resources,
    /// Compile-time transformers (`support/transformer*`).
    Transformer,
}

impl FileRole {
    /// Folder scanned for this role, or `None` for root-level roles.
    pub fn folder(&self) -> Option<&'static str> {
        match self {
            FileRole::Index => None,
            FileRole::Src => Some("src"),
            FileRole::Test => Some("test"),
            FileRole::Support | FileRole::Transformer => Some("support"),
            FileRole::Bin => Some("bin"),
            FileRole::Resources => Some("resources"),
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileRole::Index => "index",
            FileRole::Src => "src",
            FileRole::Test => "test",
            FileRole::Support => "support",
            FileRole::Bin => "bin",
            FileRole::Resources => "resources",
            FileRole::Transformer => "transformer",
        };
        f.write_str(s)
    }
}

/// File type, derived from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// TypeScript source.
    Ts,
    /// JavaScript source.
    Js,
    /// Declaration file (`.d.ts`).
    Typings,
    /// JSON data.
    Json,
    /// Markdown documentation.
    Markdown,
    /// Anything else.
    Unknown,
}

impl FileType {
    /// Classifies a path by its extension.
    pub fn from_path(path: &Path) -> Self {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.ends_with(".d.ts") || name.ends_with(".d.mts") || name.ends_with(".d.cts") {
            return FileType::Typings;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("ts" | "tsx" | "mts" | "cts") => FileType::Ts,
            Some("js" | "jsx" | "mjs" | "cjs") => FileType::Js,
            Some("json") => FileType::Json,
            Some("md" | "markdown") => FileType::Markdown,
            _ => FileType::Unknown,
        }
    }

    /// Returns `true` for types the toolchain compiles.
    pub fn is_source(&self) -> bool {
        matches!(self, FileType::Ts | FileType::Js)
    }

    /// Maps a source-relative path to its output-relative path.
    ///
    /// Compiled TypeScript gets the matching JavaScript extension; every
    /// other file keeps its name.
    pub fn output_relative(&self, relative: &str) -> String {
        if *self != FileType::Ts {
            return relative.to_string();
        }
        let Some((stem, ext)) = relative.rsplit_once('.') else {
            return relative.to_string();
        };
        let js_ext = match ext {
            "mts" => "mjs",
            "cts" => "cjs",
            _ => "js",
        };
        format!("{stem}.{js_ext}")
    }
}

/// One file of a module.
///
/// Serialized as the tuple `[relativePath, fileType, fingerprint]`. The
/// fingerprint is a content hash for sources and a `size-mtime` stamp for
/// everything else; an empty fingerprint marks a file that must be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(
    from = "(String, FileType, String)",
    into = "(String, FileType, String)"
)]
pub struct ManifestFile {
    /// Path relative to the module folder, `/`-separated.
    pub path: String,
    /// File type.
    pub file_type: FileType,
    /// Change-detection fingerprint.
    pub fingerprint: String,
}

impl From<(String, FileType, String)> for ManifestFile {
    fn from((path, file_type, fingerprint): (String, FileType, String)) -> Self {
        Self {
            path,
            file_type,
            fingerprint,
        }
    }
}

impl From<ManifestFile> for (String, FileType, String) {
    fn from(file: ManifestFile) -> Self {
        (file.path, file.file_type, file.fingerprint)
    }
}

/// A module as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestModule {
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
    /// Workspace-relative source folder.
    pub source: PathBuf,
    /// Output-folder-relative output folder.
    pub output: PathBuf,
    /// Build purposes this module participates in.
    pub profiles: BTreeSet<Profile>,
    /// Whether the module lives in the workspace rather than `node_modules`.
    pub local: bool,
    /// Whether the module is a workspace member.
    pub workspace: bool,
    /// Whether the target module depends on it outside dev dependencies.
    pub prod: bool,
    /// Framework modules this module depends on.
    pub dependencies: BTreeSet<String>,
    /// Hash of the module's `package.json`.
    pub descriptor_hash: ContentHash,
    /// Files by role.
    pub files: BTreeMap<FileRole, Vec<ManifestFile>>,
}

impl ManifestModule {
    /// Iterates over every file with its role.
    pub fn all_files(&self) -> impl Iterator<Item = (FileRole, &ManifestFile)> {
        self.files
            .iter()
            .flat_map(|(role, files)| files.iter().map(move |f| (*role, f)))
    }

    /// Looks up a file by its module-relative path.
    pub fn file(&self, path: &str) -> Option<(FileRole, &ManifestFile)> {
        self.all_files().find(|(_, f)| f.path == path)
    }

    /// Returns the fingerprint of every file keyed by module-relative path.
    pub fn fingerprints(&self) -> BTreeMap<String, String> {
        self.all_files()
            .map(|(_, f)| (f.path.clone(), f.fingerprint.clone()))
            .collect()
    }

    /// Returns `true` if the module has at least one transformer file.
    pub fn has_transformers(&self) -> bool {
        self.files
            .get(&FileRole::Transformer)
            .is_some_and(|files| !files.is_empty())
    }

    /// Number of files across all roles.
    pub fn file_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    /// Clears the fingerprint of a file so the next build recompiles it.
    pub fn clear_fingerprint(&mut self, path: &str) -> bool {
        for files in self.files.values_mut() {
            if let Some(f) = files.iter_mut().find(|f| f.path == path) {
                f.fingerprint.clear();
                return true;
            }
        }
        false
    }
}

/// The persisted description of one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    /// Workspace identity.
    pub workspace: WorkspaceInfo,
    /// Folder layout.
    pub build: BuildLayout,
    /// Target module.
    pub main: MainModule,
    /// Milliseconds since the Unix epoch when the file set last changed.
    pub generated_at: u64,
    /// Name of the target module.
    pub main_module: String,
    /// Modules by name.
    pub modules: BTreeMap<String, ManifestModule>,
}

impl ModuleManifest {
    /// Creates an empty manifest for a context.
    pub fn empty(ctx: &ManifestContext, generated_at: u64) -> Self {
        Self {
            workspace: ctx.workspace.clone(),
            build: ctx.build.clone(),
            main: ctx.main.clone(),
            generated_at,
            main_module: ctx.main.name.clone(),
            modules: BTreeMap::new(),
        }
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<(), String> {
        if !self.modules.contains_key(&self.main_module) {
            return Err(format!("main module '{}' is not listed", self.main_module));
        }
        for (key, module) in &self.modules {
            if *key != module.name {
                return Err(format!("module key '{key}' does not match name '{}'", module.name));
            }
            if module.output != output_path_for(&module.name) {
                return Err(format!(
                    "module '{key}' has output '{}', expected '{}'",
                    module.output.display(),
                    output_path_for(&module.name).display()
                ));
            }
            for dep in &module.dependencies {
                if !self.modules.contains_key(dep) {
                    return Err(format!("module '{key}' depends on unknown module '{dep}'"));
                }
            }
        }
        Ok(())
    }

    /// Returns `name` and every module it transitively depends on.
    pub fn dependency_closure(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(module) = self.modules.get(&current) {
                queue.extend(module.dependencies.iter().cloned());
            }
        }
        seen.retain(|n| self.modules.contains_key(n));
        seen
    }

    /// Absolute source path of a module file.
    pub fn source_path(&self, module: &ManifestModule, file: &ManifestFile) -> PathBuf {
        self.workspace.path.join(&module.source).join(&file.path)
    }

    /// Absolute output path of a module file.
    pub fn output_path(&self, module: &ManifestModule, file: &ManifestFile) -> PathBuf {
        self.build
            .output_folder
            .join(&module.output)
            .join(file.file_type.output_relative(&file.path))
    }

    /// Absolute output folder of a module.
    pub fn module_output_dir(&self, module: &ManifestModule) -> PathBuf {
        self.build.output_folder.join(&module.output)
    }

    /// Total number of files across all modules.
    pub fn file_count(&self) -> usize {
        self.modules.values().map(ManifestModule::file_count).sum()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use trellis_config::ModuleType;
    use trellis_context::PackageManager;

    pub(crate) fn context(root: &Path) -> ManifestContext {
        ManifestContext {
            workspace: WorkspaceInfo {
                name: "app".to_string(),
                path: root.to_path_buf(),
                mono: false,
                manager: PackageManager::Npm,
                module_type: ModuleType::CommonJs,
                default_env: "local".to_string(),
            },
            build: BuildLayout {
                compiler_folder: root.join(".trellis_compiler"),
                compiler_url: "http://localhost:20001".to_string(),
                compiler_module_folder: PathBuf::from("node_modules/@trellis/compiler"),
                output_folder: root.join(".trellis_output"),
                tool_folder: root.join(".trellis_tool"),
                cache_folder: root.join(".trellis_tool/cache"),
            },
            main: MainModule {
                name: "app".to_string(),
                folder: root.to_path_buf(),
                version: "1.0.0".to_string(),
                description: None,
            },
        }
    }

    pub(crate) fn module(name: &str, deps: &[&str]) -> ManifestModule {
        ManifestModule {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            source: PathBuf::from(name),
            output: output_path_for(name),
            profiles: BTreeSet::from([Profile::Build]),
            local: true,
            workspace: false,
            prod: true,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            descriptor_hash: ContentHash::from_bytes(name.as_bytes()),
            files: BTreeMap::new(),
        }
    }

    #[test]
    fn file_type_classification() {
        assert_eq!(FileType::from_path(Path::new("a.ts")), FileType::Ts);
        assert_eq!(FileType::from_path(Path::new("a.d.ts")), FileType::Typings);
        assert_eq!(FileType::from_path(Path::new("a.mjs")), FileType::Js);
        assert_eq!(FileType::from_path(Path::new("a.json")), FileType::Json);
        assert_eq!(FileType::from_path(Path::new("README.md")), FileType::Markdown);
        assert_eq!(FileType::from_path(Path::new("logo.png")), FileType::Unknown);
        assert!(FileType::Ts.is_source());
        assert!(!FileType::Typings.is_source());
    }

    #[test]
    fn output_relative_maps_extensions() {
        assert_eq!(FileType::Ts.output_relative("src/a.ts"), "src/a.js");
        assert_eq!(FileType::Ts.output_relative("src/a.mts"), "src/a.mjs");
        assert_eq!(FileType::Js.output_relative("src/a.js"), "src/a.js");
        assert_eq!(FileType::Json.output_relative("a.json"), "a.json");
    }

    #[test]
    fn manifest_file_serializes_as_tuple() {
        let f = ManifestFile {
            path: "src/a.ts".to_string(),
            file_type: FileType::Ts,
            fingerprint: "abc".to_string(),
        };
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(json, r#"["src/a.ts","ts","abc"]"#);
        let back: ManifestFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn output_path_for_scoped_name() {
        assert_eq!(
            output_path_for("@acme/users"),
            PathBuf::from("node_modules/@acme/users")
        );
    }

    #[test]
    fn validate_catches_inconsistencies() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let mut m = ModuleManifest::empty(&ctx, 0);
        assert!(m.validate().is_err());

        m.modules.insert("app".to_string(), module("app", &["lib"]));
        assert!(m.validate().unwrap_err().contains("unknown module 'lib'"));

        m.modules.insert("lib".to_string(), module("lib", &[]));
        assert!(m.validate().is_ok());

        m.modules.get_mut("lib").unwrap().output = PathBuf::from("elsewhere");
        assert!(m.validate().is_err());
    }

    #[test]
    fn dependency_closure_is_transitive() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = ModuleManifest::empty(&context(tmp.path()), 0);
        m.modules.insert("app".to_string(), module("app", &["a"]));
        m.modules.insert("a".to_string(), module("a", &["b"]));
        m.modules.insert("b".to_string(), module("b", &["a"]));
        m.modules.insert("c".to_string(), module("c", &[]));
        let closure = m.dependency_closure("app");
        assert_eq!(
            closure,
            BTreeSet::from(["app".to_string(), "a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn clear_fingerprint_marks_file() {
        let mut m = module("app", &[]);
        m.files.insert(
            FileRole::Src,
            vec![ManifestFile {
                path: "src/a.ts".to_string(),
                file_type: FileType::Ts,
                fingerprint: "h".to_string(),
            }],
        );
        assert!(m.clear_fingerprint("src/a.ts"));
        assert_eq!(m.file("src/a.ts").unwrap().1.fingerprint, "");
        assert!(!m.clear_fingerprint("src/missing.ts"));
    }
}
