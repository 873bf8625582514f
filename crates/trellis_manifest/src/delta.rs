//! Differences between two manifests.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Invalidation requested by the caller before the scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidationHint {
    /// Plain incremental build.
    #[default]
    None,
    /// The compiler fingerprint changed; every existing file is stale.
    Compiler,
}

/// Invalidation that was applied to the delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Invalidation {
    /// Only fingerprint changes were reported.
    #[default]
    None,
    /// Every existing file was marked changed after a compiler change.
    Compiler,
    /// Modules whose transformer scope changed had all files marked changed.
    Transformers {
        /// The affected modules.
        modules: BTreeSet<String>,
    },
}

/// File changes within one module, as module-relative paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDelta {
    /// Files that did not exist in the previous manifest.
    pub added: Vec<String>,
    /// Files whose fingerprint changed or that were invalidated.
    pub changed: Vec<String>,
    /// Files that no longer exist.
    pub removed: Vec<String>,
}

impl ModuleDelta {
    /// Returns `true` if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Files that need compiling or copying (`added ∪ changed`).
    pub fn dirty(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.changed.iter())
    }

    pub(crate) fn normalize(&mut self) {
        for list in [&mut self.added, &mut self.changed, &mut self.removed] {
            list.sort();
            list.dedup();
        }
    }
}

/// Per-module changes plus the invalidation applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDelta {
    /// Changes by module name. Modules without changes are omitted.
    pub modules: BTreeMap<String, ModuleDelta>,
    /// Invalidation applied during the scan.
    pub invalidation: Invalidation,
}

impl ManifestDelta {
    /// Returns `true` if no module has changes.
    pub fn is_empty(&self) -> bool {
        self.modules.values().all(ModuleDelta::is_empty)
    }

    /// Number of files to compile or copy.
    pub fn dirty_count(&self) -> usize {
        self.modules
            .values()
            .map(|d| d.added.len() + d.changed.len())
            .sum()
    }

    /// Number of removed files.
    pub fn removed_count(&self) -> usize {
        self.modules.values().map(|d| d.removed.len()).sum()
    }

    /// Returns the delta of a module, if it has one.
    pub fn module(&self, name: &str) -> Option<&ModuleDelta> {
        self.modules.get(name)
    }
}
