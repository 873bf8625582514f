//! Package descriptor (`package.json`) types.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// File name of a package descriptor.
pub const DESCRIPTOR_FILE: &str = "package.json";

/// The subset of `package.json` that the build orchestrator reads.
///
/// Unknown keys are ignored. Only `name` is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDescriptor {
    /// Package name, possibly scoped (`@acme/users`).
    pub name: String,
    /// Package version.
    #[serde(default)]
    pub version: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Module-system flavor (`"module"` or `"commonjs"`).
    #[serde(default, rename = "type")]
    pub module_type: Option<String>,
    /// Workspace member globs; present only on multi-module aggregators.
    #[serde(default)]
    pub workspaces: Option<WorkspaceGlobs>,
    /// Runtime dependencies.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Development-only dependencies.
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
    /// Peer dependencies.
    #[serde(default)]
    pub peer_dependencies: BTreeMap<String, String>,
    /// Framework metadata. Its presence marks the package as a framework module.
    #[serde(default)]
    pub trellis: Option<TrellisMeta>,
}

/// Workspace member declaration.
///
/// Package managers accept both a bare list and an object with a `packages`
/// list, so both shapes deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkspaceGlobs {
    /// `"workspaces": ["modules/*"]`
    List(Vec<String>),
    /// `"workspaces": { "packages": ["modules/*"] }`
    Packages {
        /// Member globs.
        packages: Vec<String>,
    },
}

impl WorkspaceGlobs {
    /// Returns the member globs regardless of the declaration shape.
    pub fn patterns(&self) -> &[String] {
        match self {
            WorkspaceGlobs::List(list) => list,
            WorkspaceGlobs::Packages { packages } => packages,
        }
    }
}

/// The `"trellis"` section of a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrellisMeta {
    /// Build purposes that include this module. Defaults to `["build"]`.
    #[serde(default)]
    pub profiles: Vec<Profile>,
    /// Opts the package out of monorepo detection.
    #[serde(default)]
    pub isolated: bool,
    /// Default runtime environment name for the workspace.
    #[serde(default)]
    pub default_env: Option<String>,
    /// Display name used in logs.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A build purpose tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Standard build.
    Build,
    /// Test runs.
    Test,
    /// Documentation generation.
    Doc,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Build => write!(f, "build"),
            Profile::Test => write!(f, "test"),
            Profile::Doc => write!(f, "doc"),
        }
    }
}

/// How compiled output is loaded at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    /// CommonJS (`require`).
    #[default]
    CommonJs,
    /// ECMAScript modules (`import`).
    Module,
}

impl PackageDescriptor {
    /// Returns `true` if this descriptor aggregates workspace members.
    pub fn is_aggregator(&self) -> bool {
        self.workspaces
            .as_ref()
            .is_some_and(|w| !w.patterns().is_empty())
    }

    /// Returns `true` if this package participates in framework builds.
    pub fn is_framework_module(&self) -> bool {
        self.trellis.is_some()
    }

    /// Returns `true` if the package opted out of monorepo detection.
    pub fn is_isolated(&self) -> bool {
        self.trellis.as_ref().is_some_and(|t| t.isolated)
    }

    /// Returns `true` if the module belongs in a build for `purpose`.
    ///
    /// Standard-build modules are part of every purpose; modules tagged
    /// only for tests or docs join those builds alone.
    pub fn serves(&self, purpose: Profile) -> bool {
        let profiles = self.profiles();
        profiles.contains(&purpose) || profiles.contains(&Profile::Build)
    }

    /// Returns the module's profiles, defaulting to `{build}`.
    pub fn profiles(&self) -> BTreeSet<Profile> {
        let declared: BTreeSet<Profile> = self
            .trellis
            .as_ref()
            .map(|t| t.profiles.iter().copied().collect())
            .unwrap_or_default();
        if declared.is_empty() {
            BTreeSet::from([Profile::Build])
        } else {
            declared
        }
    }

    /// Returns the module-system flavor declared by `"type"`.
    pub fn module_type(&self) -> ModuleType {
        match self.module_type.as_deref() {
            Some("module") => ModuleType::Module,
            _ => ModuleType::CommonJs,
        }
    }

    /// Returns the workspace member globs, empty for non-aggregators.
    pub fn workspace_patterns(&self) -> &[String] {
        self.workspaces
            .as_ref()
            .map(WorkspaceGlobs::patterns)
            .unwrap_or_default()
    }

    /// Iterates dependency names; dev dependencies are included only when asked.
    pub fn dependency_names(&self, include_dev: bool) -> impl Iterator<Item = (&str, bool)> {
        let prod = self
            .dependencies
            .keys()
            .chain(self.peer_dependencies.keys())
            .map(|k| (k.as_str(), true));
        let dev = self
            .dev_dependencies
            .keys()
            .filter(move |_| include_dev)
            .map(|k| (k.as_str(), false));
        prod.chain(dev)
    }
}
