//! Workspace discovery.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use trellis_config::{load_descriptor, ConfigError, ModuleType, PackageDescriptor, DESCRIPTOR_FILE};

/// Package manager owning the dependency installation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// npm (`package-lock.json`).
    #[default]
    Npm,
    /// Yarn (`yarn.lock`).
    Yarn,
    /// pnpm (`pnpm-lock.yaml`).
    Pnpm,
}

impl PackageManager {
    /// Detects the package manager from the lockfile present in `root`.
    pub fn detect(root: &Path) -> Self {
        [PackageManager::Pnpm, PackageManager::Yarn, PackageManager::Npm]
            .into_iter()
            .find(|m| root.join(m.lockfile()).is_file())
            .unwrap_or_default()
    }

    /// File name of this manager's lockfile.
    pub fn lockfile(&self) -> &'static str {
        match self {
            PackageManager::Npm => "package-lock.json",
            PackageManager::Yarn => "yarn.lock",
            PackageManager::Pnpm => "pnpm-lock.yaml",
        }
    }
}

/// A resolved workspace: the root directory every build of a module happens in.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    /// Absolute root directory.
    pub path: PathBuf,
    /// Root package name.
    pub name: String,
    /// Module-system flavor of the root package.
    pub module_type: ModuleType,
    /// Detected package manager.
    pub manager: PackageManager,
    /// Whether the root aggregates workspace members.
    pub mono: bool,
    /// Default runtime environment name.
    pub default_env: String,
    /// Workspace members by package name.
    pub members: BTreeMap<String, PathBuf>,
}

impl Workspace {
    /// Resolves a module specifier to its folder.
    ///
    /// Workspace members resolve to their source folder; anything else must be
    /// installed under `node_modules`.
    pub fn resolve(&self, specifier: &str) -> Result<PathBuf, ConfigError> {
        if specifier == self.name {
            return Ok(self.path.clone());
        }
        if let Some(folder) = self.members.get(specifier) {
            return Ok(folder.clone());
        }
        let installed = self.path.join("node_modules").join(specifier);
        if installed.join(DESCRIPTOR_FILE).is_file() {
            return Ok(installed);
        }
        Err(ConfigError::UnresolvedModule(specifier.to_string()))
    }

    /// Returns `file` relative to the workspace root, or unchanged if outside it.
    pub fn strip_root(&self, file: &Path) -> PathBuf {
        file.strip_prefix(&self.path)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| file.to_path_buf())
    }

    /// Returns the package manager's lockfile path.
    pub fn lockfile(&self) -> PathBuf {
        self.path.join(self.manager.lockfile())
    }

    /// Returns `true` if `name` is a workspace member.
    pub fn is_member(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }
}

/// Walks upward from `start` to the nearest directory containing `package.json`.
pub fn find_descriptor_dir(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(DESCRIPTOR_FILE).is_file() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Finds and memoizes workspaces.
///
/// Each resolver keeps its own cache; dropping or clearing it forces the next
/// lookup to hit the filesystem again.
#[derive(Debug, Default)]
pub struct PathResolver {
    cache: Mutex<HashMap<PathBuf, Arc<Workspace>>>,
}

impl PathResolver {
    /// Creates a resolver with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the workspace containing `start`.
    pub fn resolve_workspace(&self, start: &Path) -> Result<Arc<Workspace>, ConfigError> {
        let start = absolute(start)?;
        if let Some(ws) = self.lock().get(&start) {
            return Ok(Arc::clone(ws));
        }
        let ws = Arc::new(discover(&start)?);
        self.lock().insert(start, Arc::clone(&ws));
        Ok(ws)
    }

    /// Forgets every memoized workspace.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<Workspace>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    match std::fs::canonicalize(path) {
        Ok(p) => Ok(p),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => Ok(std::env::current_dir()?.join(path)),
    }
}

fn discover(start: &Path) -> Result<Workspace, ConfigError> {
    let package_dir =
        find_descriptor_dir(start).ok_or_else(|| ConfigError::NoDescriptor(start.to_path_buf()))?;
    let package = load_descriptor(&package_dir)?;

    let (root, descriptor) = if package.is_isolated() || package.is_aggregator() {
        (package_dir, package)
    } else {
        find_aggregator(&package_dir)?.unwrap_or((package_dir, package))
    };

    let mono = descriptor.is_aggregator() && !descriptor.is_isolated();
    let members = if mono {
        expand_members(&root, descriptor.workspace_patterns())
    } else {
        BTreeMap::new()
    };
    tracing::debug!(root = %root.display(), mono, members = members.len(), "resolved workspace");

    Ok(Workspace {
        manager: PackageManager::detect(&root),
        name: descriptor.name.clone(),
        module_type: descriptor.module_type(),
        default_env: descriptor
            .trellis
            .as_ref()
            .and_then(|t| t.default_env.clone())
            .unwrap_or_else(|| "local".to_string()),
        mono,
        members,
        path: root,
    })
}

/// Walks upward from a package looking for an ancestor that declares workspaces.
///
/// The walk stops at the repository boundary (a directory containing `.git`).
fn find_aggregator(
    package_dir: &Path,
) -> Result<Option<(PathBuf, PackageDescriptor)>, ConfigError> {
    let mut current = package_dir.to_path_buf();
    loop {
        if current.join(".git").exists() {
            return Ok(None);
        }
        if !current.pop() {
            return Ok(None);
        }
        if !current.join(DESCRIPTOR_FILE).is_file() {
            continue;
        }
        match load_descriptor(&current) {
            Ok(descriptor) if descriptor.is_aggregator() => {
                return Ok(Some((current, descriptor)));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(folder = %current.display(), "ignoring unreadable parent descriptor: {e}");
            }
        }
    }
}

/// Expands workspace globs into member folders keyed by package name.
fn expand_members(root: &Path, patterns: &[String]) -> BTreeMap<String, PathBuf> {
    let mut members = BTreeMap::new();
    for pattern in patterns {
        for dir in expand_pattern(root, pattern) {
            if !dir.join(DESCRIPTOR_FILE).is_file() {
                continue;
            }
            match load_descriptor(&dir) {
                Ok(d) => {
                    members.insert(d.name, dir);
                }
                Err(e) => {
                    tracing::warn!(folder = %dir.display(), "skipping workspace member: {e}");
                }
            }
        }
    }
    members
}

fn expand_pattern(root: &Path, pattern: &str) -> Vec<PathBuf> {
    let mut dirs = vec![root.to_path_buf()];
    for segment in pattern.trim_start_matches("./").split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if !segment.contains('*') {
            dirs = dirs.into_iter().map(|d| d.join(segment)).collect();
            continue;
        }
        let mut next = Vec::new();
        for dir in &dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            let mut matched: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
                .filter(|e| {
                    let name = e.file_name();
                    let name = name.to_string_lossy();
                    !name.starts_with('.') && name != "node_modules" && glob_match(segment, &name)
                })
                .map(|e| e.path())
                .collect();
            matched.sort();
            next.extend(matched);
        }
        dirs = next;
    }
    dirs
}

/// Matches a single path segment against a pattern where `*` matches any run of characters.
fn glob_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return name.is_empty(),
    };
    let Some(mut remaining) = name.strip_prefix(first) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.len() >= last.len() && remaining.ends_with(last)
}
