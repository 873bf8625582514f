//! Manifest persistence.
//!
//! The root manifest lives at `<outputFolder>/manifest.json`. In a monorepo
//! every workspace member also gets `<outputFolder>/node_modules/<name>/manifest.json`,
//! restricted to that member's dependency closure.

use std::path::{Path, PathBuf};

use crate::error::ManifestError;
use crate::model::{FileRole, ModuleManifest};

/// File name of a persisted manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Writes a manifest as pretty JSON.
///
/// The file is left untouched when its content would not change, so
/// no-op builds do not bump its modification time.
pub fn write_manifest(manifest: &ModuleManifest, path: &Path) -> Result<(), ManifestError> {
    let mut json =
        serde_json::to_string_pretty(manifest).map_err(|e| ManifestError::Serialization {
            reason: e.to_string(),
        })?;
    json.push('\n');
    if std::fs::read_to_string(path).is_ok_and(|existing| existing == json) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ManifestError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(path, json).map_err(|e| ManifestError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Loads and validates a manifest. A missing file is `Ok(None)`.
pub fn load_manifest(path: &Path) -> Result<Option<ModuleManifest>, ManifestError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ManifestError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    let manifest: ModuleManifest =
        serde_json::from_str(&content).map_err(|e| ManifestError::Invalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    manifest.validate().map_err(|reason| ManifestError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;
    Ok(Some(manifest))
}

/// Loads the previous manifest, treating any problem as "no previous build".
pub fn load_previous(path: &Path) -> Option<ModuleManifest> {
    match load_manifest(path) {
        Ok(previous) => previous,
        Err(e) => {
            tracing::warn!("ignoring previous manifest: {e}");
            None
        }
    }
}

/// Persists the root manifest and, in a monorepo, one manifest per member.
///
/// Returns the paths written.
pub fn persist(manifest: &ModuleManifest) -> Result<Vec<PathBuf>, ManifestError> {
    let output = &manifest.build.output_folder;
    let root_path = output.join(MANIFEST_FILE);
    write_manifest(manifest, &root_path)?;
    let mut written = vec![root_path];

    if manifest.workspace.mono {
        for (name, module) in &manifest.modules {
            if !module.workspace {
                continue;
            }
            let closure = manifest.dependency_closure(name);
            let mut scoped = manifest.clone();
            scoped.modules.retain(|n, _| closure.contains(n));
            scoped.main_module = name.clone();
            let path = output.join(&module.output).join(MANIFEST_FILE);
            write_manifest(&scoped, &path)?;
            written.push(path);
        }
    }
    Ok(written)
}

/// Returns a copy for production use: only modules the target needs at
/// runtime, without test files.
pub fn strip_for_prod(manifest: &ModuleManifest) -> ModuleManifest {
    let mut stripped = manifest.clone();
    let main = stripped.main_module.clone();
    stripped.modules.retain(|name, m| m.prod || *name == main);
    let kept: Vec<String> = stripped.modules.keys().cloned().collect();
    for module in stripped.modules.values_mut() {
        module.files.remove(&FileRole::Test);
        module.dependencies.retain(|d| kept.contains(d));
    }
    stripped
}
