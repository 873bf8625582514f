//! The resolved build context for one invocation.

use crate::endpoint::compiler_url;
use crate::resolver::{find_descriptor_dir, PackageManager, PathResolver, Workspace};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trellis_config::{
    load_descriptor, load_settings, BuildSettings, ConfigError, EnvOverrides, ModuleType,
};

/// Workspace identity as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    /// Root package name.
    pub name: String,
    /// Absolute root directory.
    pub path: PathBuf,
    /// Whether the workspace aggregates several modules.
    pub mono: bool,
    /// Package manager.
    pub manager: PackageManager,
    /// Module-system flavor.
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    /// Default runtime environment name.
    pub default_env: String,
}

/// On-disk layout and compiler server address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildLayout {
    /// Folder holding compiler state (`compiler.json`).
    pub compiler_folder: PathBuf,
    /// Compiler server URL, a pure function of the workspace path.
    pub compiler_url: String,
    /// Workspace-relative folder of the compiler module.
    pub compiler_module_folder: PathBuf,
    /// Folder receiving compiled output and manifests.
    pub output_folder: PathBuf,
    /// Folder for tool state.
    pub tool_folder: PathBuf,
    /// Folder for persisted cache entries.
    pub cache_folder: PathBuf,
}

/// The module selected for this invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainModule {
    /// Package name.
    pub name: String,
    /// Absolute module folder.
    pub folder: PathBuf,
    /// Package version.
    pub version: String,
    /// Package description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Everything a build needs to know about where it runs.
///
/// Recomputed on every invocation and embedded in the manifest; never
/// persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestContext {
    /// Workspace identity.
    pub workspace: WorkspaceInfo,
    /// Folder layout.
    pub build: BuildLayout,
    /// Target module.
    pub main: MainModule,
}

impl ManifestContext {
    /// Path of the root manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.build.output_folder.join("manifest.json")
    }

    /// Path of the compiler state file.
    pub fn compiler_state_path(&self) -> PathBuf {
        self.build.compiler_folder.join("compiler.json")
    }

    /// Returns `true` if `path` lies in one of the folders the build writes to.
    pub fn is_build_path(&self, path: &Path) -> bool {
        [
            &self.build.output_folder,
            &self.build.compiler_folder,
            &self.build.tool_folder,
            &self.build.cache_folder,
        ]
        .iter()
        .any(|folder| path.starts_with(folder))
    }
}

/// Resolves the workspace, loads `trellis.toml`, and builds the context.
pub fn load_context(
    resolver: &PathResolver,
    folder: Option<&Path>,
    env: &EnvOverrides,
) -> Result<(ManifestContext, BuildSettings), ConfigError> {
    let start = start_dir(folder)?;
    let ws = resolver.resolve_workspace(&start)?;
    let settings = load_settings(&ws.path)?;
    let ctx = resolve_context(resolver, folder, env, &settings)?;
    Ok((ctx, settings))
}

/// Builds the [`ManifestContext`] for a build started at `folder` (or the
/// current directory).
///
/// The target module is the package containing `folder` when one is given,
/// else the `TRELLIS_MODULE` selection, else the workspace root.
pub fn resolve_context(
    resolver: &PathResolver,
    folder: Option<&Path>,
    env: &EnvOverrides,
    settings: &BuildSettings,
) -> Result<ManifestContext, ConfigError> {
    let start = start_dir(folder)?;
    resolve_from(resolver, &start, folder, env, settings)
}

fn resolve_from(
    resolver: &PathResolver,
    start: &Path,
    folder: Option<&Path>,
    env: &EnvOverrides,
    settings: &BuildSettings,
) -> Result<ManifestContext, ConfigError> {
    let mut ws = resolver.resolve_workspace(start)?;

    let target_dir = match (folder, env.module.as_deref()) {
        (Some(dir), _) => {
            find_descriptor_dir(dir).ok_or_else(|| ConfigError::NoDescriptor(dir.to_path_buf()))?
        }
        (None, Some(spec)) => ws.resolve(spec)?,
        (None, None) => ws.path.clone(),
    };
    let target_dir = std::fs::canonicalize(&target_dir).unwrap_or(target_dir);
    let target = load_descriptor(&target_dir)?;

    if target.is_isolated() && ws.mono {
        tracing::debug!(module = %target.name, "isolated module, monorepo detection suppressed");
        ws = resolver.resolve_workspace(&target_dir)?;
    }

    let layout = &settings.build;
    let root = &ws.path;
    let tool_folder = root.join(&layout.tool_folder);
    let cache_folder = match &env.cache_dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => root.join(dir),
        None => tool_folder.join("cache"),
    };

    Ok(ManifestContext {
        workspace: workspace_info(&ws),
        build: BuildLayout {
            compiler_folder: root.join(&layout.compiler_folder),
            compiler_url: compiler_url(root),
            compiler_module_folder: compiler_module_folder(&ws, &layout.compiler_module),
            output_folder: root.join(&layout.output_folder),
            tool_folder,
            cache_folder,
        },
        main: MainModule {
            name: target.name,
            folder: target_dir,
            version: target.version,
            description: target.description,
        },
    })
}

fn start_dir(folder: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match folder {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Ok(std::env::current_dir()?),
    }
}

fn workspace_info(ws: &Arc<Workspace>) -> WorkspaceInfo {
    WorkspaceInfo {
        name: ws.name.clone(),
        path: ws.path.clone(),
        mono: ws.mono,
        manager: ws.manager,
        module_type: ws.module_type,
        default_env: ws.default_env.clone(),
    }
}

fn compiler_module_folder(ws: &Workspace, compiler_module: &str) -> PathBuf {
    match ws.resolve(compiler_module) {
        Ok(folder) => ws.strip_root(&folder),
        Err(_) => Path::new("node_modules").join(compiler_module),
    }
}
