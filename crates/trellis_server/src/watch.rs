//! File watching for watch mode.
//!
//! Raw notifications are filtered here and forwarded to the coordinator as
//! [`Trigger::FileChange`]; debouncing happens there.

use std::path::{Component, Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use trellis_config::WatchSettings;
use trellis_context::ManifestContext;

use crate::coordinator::Trigger;
use crate::error::ServerError;

/// Folder names never worth rebuilding for.
const ALWAYS_IGNORED: [&str; 2] = ["node_modules", ".git"];

/// Decides which changed paths matter.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    root: PathBuf,
    build_folders: Vec<PathBuf>,
    patterns: Vec<String>,
}

impl ChangeFilter {
    /// A filter for the workspace of `ctx`, with the user's ignore list.
    pub fn new(ctx: &ManifestContext, settings: &WatchSettings) -> Self {
        Self {
            root: ctx.workspace.path.clone(),
            build_folders: vec![
                ctx.build.output_folder.clone(),
                ctx.build.compiler_folder.clone(),
                ctx.build.tool_folder.clone(),
                ctx.build.cache_folder.clone(),
            ],
            patterns: settings
                .ignore
                .iter()
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Returns `true` if a change at `path` should not trigger a build.
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.build_folders.iter().any(|f| path.starts_with(f)) {
            return true;
        }
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let names: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .collect();
        if names.iter().any(|n| ALWAYS_IGNORED.contains(n)) {
            return true;
        }
        self.patterns.iter().any(|pattern| {
            relative.starts_with(pattern) || names.iter().any(|n| n == pattern)
        })
    }
}

/// A running recursive watcher over the workspace root.
///
/// Dropping it stops the notifications.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Starts watching `ctx.workspace.path`, sending relevant changes to
    /// `triggers`.
    pub fn start(
        ctx: &ManifestContext,
        settings: &WatchSettings,
        triggers: mpsc::Sender<Trigger>,
    ) -> Result<Self, ServerError> {
        let filter = ChangeFilter::new(ctx, settings);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => forward(&filter, &triggers, event),
                Err(e) => tracing::warn!("watch error: {e}"),
            },
            notify::Config::default(),
        )
        .map_err(|e| ServerError::Io(std::io::Error::other(format!("failed to create file watcher: {e}"))))?;

        watcher
            .watch(&ctx.workspace.path, RecursiveMode::Recursive)
            .map_err(|e| ServerError::Io(std::io::Error::other(format!("failed to watch workspace: {e}"))))?;
        tracing::info!(root = %ctx.workspace.path.display(), "watching for changes");
        Ok(Self { _watcher: watcher })
    }
}

/// Sends the relevant paths of `event` to the coordinator.
///
/// Runs on the watcher thread and waits for room when the queue is full.
fn forward(filter: &ChangeFilter, triggers: &mpsc::Sender<Trigger>, event: Event) {
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }
    let paths: Vec<PathBuf> = event
        .paths
        .into_iter()
        .filter(|p| !filter.is_ignored(p))
        .collect();
    if paths.is_empty() {
        return;
    }
    if triggers.blocking_send(Trigger::FileChange { paths }).is_err() {
        tracing::debug!("coordinator gone, dropping file change");
    }
}
