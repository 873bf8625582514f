//! Candidate module discovery and build ordering.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Component, Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use trellis_common::ContentHash;
use trellis_config::{PackageDescriptor, Profile, DESCRIPTOR_FILE};
use trellis_context::{ManifestContext, Workspace};

use crate::error::ManifestError;

/// A module selected for the build, with its resolved dependencies.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredModule {
    /// Package name.
    pub name: String,
    /// Absolute module folder.
    pub dir: PathBuf,
    /// Parsed descriptor.
    pub descriptor: PackageDescriptor,
    /// Hash of the raw descriptor bytes.
    pub descriptor_hash: ContentHash,
    /// Lives in the workspace rather than under `node_modules`.
    pub local: bool,
    /// Is a workspace member.
    pub workspace: bool,
    /// Reachable from the target through non-dev dependencies.
    pub prod: bool,
    /// Framework modules depended on (all kinds).
    pub dependencies: BTreeSet<String>,
    /// Framework modules depended on outside dev dependencies.
    pub prod_dependencies: BTreeSet<String>,
}

/// The set of modules a build covers, in dependency order.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    modules: BTreeMap<String, DiscoveredModule>,
    order: Vec<String>,
}

impl ModuleGraph {
    /// Discovers the modules for a build of `ctx.main` for `purpose`.
    ///
    /// Starts from the target module (and every workspace member in a
    /// monorepo) and follows descriptor dependencies that resolve to
    /// framework modules. Modules that do not serve `purpose` are dropped,
    /// except the target.
    pub fn discover(
        ctx: &ManifestContext,
        workspace: &Workspace,
        purpose: Profile,
    ) -> Result<Self, ManifestError> {
        let target = ctx.main.name.clone();
        let mut found: BTreeMap<String, DiscoveredModule> = BTreeMap::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::from([ctx.main.folder.clone()]);
        if workspace.mono {
            queue.extend(workspace.members.values().cloned());
        }

        while let Some(dir) = queue.pop_front() {
            let is_target = dir == ctx.main.folder;
            let (descriptor, descriptor_hash) = match read_descriptor(&dir) {
                Ok(pair) => pair,
                Err(e) if is_target => return Err(e),
                Err(e) => {
                    tracing::warn!(folder = %dir.display(), "skipping module: {e}");
                    continue;
                }
            };
            if found.contains_key(&descriptor.name) {
                continue;
            }

            let local = is_local(&dir, &workspace.path);
            let mut dependencies = BTreeSet::new();
            let mut prod_dependencies = BTreeSet::new();
            for (spec, is_prod) in descriptor.dependency_names(local) {
                let Ok(dep_dir) = workspace.resolve(spec) else {
                    tracing::debug!(module = %descriptor.name, dependency = spec, "dependency not installed");
                    continue;
                };
                if !workspace.is_member(spec) && !is_framework_dir(&dep_dir) {
                    continue;
                }
                dependencies.insert(spec.to_string());
                if is_prod {
                    prod_dependencies.insert(spec.to_string());
                }
                queue.push_back(dep_dir);
            }

            let name = descriptor.name.clone();
            found.insert(
                name.clone(),
                DiscoveredModule {
                    workspace: workspace.is_member(&name),
                    name,
                    dir,
                    descriptor,
                    descriptor_hash,
                    local,
                    prod: false,
                    dependencies,
                    prod_dependencies,
                },
            );
        }

        found.retain(|name, m| *name == target || m.descriptor.serves(purpose));
        let kept: BTreeSet<String> = found.keys().cloned().collect();
        for module in found.values_mut() {
            module.dependencies.retain(|d| kept.contains(d));
            module.prod_dependencies.retain(|d| kept.contains(d));
        }
        mark_prod(&mut found, &target);

        let order = dependency_order(&found);
        Ok(Self {
            modules: found,
            order,
        })
    }

    /// Modules by name.
    pub fn modules(&self) -> &BTreeMap<String, DiscoveredModule> {
        &self.modules
    }

    /// Module names, dependencies before dependents.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Iterates modules in dependency order.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredModule> {
        self.order.iter().filter_map(|n| self.modules.get(n))
    }
}

fn read_descriptor(dir: &Path) -> Result<(PackageDescriptor, ContentHash), ManifestError> {
    let path = dir.join(DESCRIPTOR_FILE);
    let raw = std::fs::read(&path).map_err(|e| ManifestError::Io {
        path: path.clone(),
        source: e,
    })?;
    let text = String::from_utf8_lossy(&raw);
    let descriptor = trellis_config::load_descriptor_from_str(&text)?;
    Ok((descriptor, ContentHash::from_bytes(&raw)))
}

fn is_framework_dir(dir: &Path) -> bool {
    read_descriptor(dir).is_ok_and(|(d, _)| d.is_framework_module())
}

fn is_local(dir: &Path, root: &Path) -> bool {
    dir.strip_prefix(root).is_ok_and(|rel| {
        !rel.components()
            .any(|c| c == Component::Normal("node_modules".as_ref()))
    })
}

fn mark_prod(modules: &mut BTreeMap<String, DiscoveredModule>, target: &str) {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([target.to_string()]);
    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(m) = modules.get(&name) {
            queue.extend(m.prod_dependencies.iter().cloned());
        }
    }
    for (name, module) in modules.iter_mut() {
        module.prod = seen.contains(name);
    }
}

/// Topologically sorts modules; falls back to name order on a cycle.
fn dependency_order(modules: &BTreeMap<String, DiscoveredModule>) -> Vec<String> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let index: BTreeMap<&str, NodeIndex> = modules
        .keys()
        .map(|name| (name.as_str(), graph.add_node(name.as_str())))
        .collect();
    for module in modules.values() {
        for dep in &module.dependencies {
            if let (Some(&from), Some(&to)) = (index.get(dep.as_str()), index.get(module.name.as_str())) {
                graph.add_edge(from, to, ());
            }
        }
    }
    match toposort(&graph, None) {
        Ok(sorted) => sorted.into_iter().map(|i| graph[i].to_string()).collect(),
        Err(cycle) => {
            tracing::warn!(
                module = %graph[cycle.node_id()],
                "dependency cycle detected, building in name order"
            );
            modules.keys().cloned().collect()
        }
    }
}
