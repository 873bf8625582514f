//! Source file hashing and change detection.
//!
//! Computes content hashes for source files and compares fingerprint maps to
//! identify which entries are new, modified, deleted, or unchanged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use rayon::prelude::*;
use trellis_common::ContentHash;

use crate::error::CacheError;
use crate::retry::retry_once;

/// Result of comparing two fingerprint maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<K> {
    /// Keys absent from the previous map.
    pub new_files: Vec<K>,
    /// Keys whose fingerprint differs.
    pub modified_files: Vec<K>,
    /// Keys present only in the previous map.
    pub deleted_files: Vec<K>,
    /// Keys whose fingerprint matches.
    pub unchanged_files: Vec<K>,
}

impl<K> ChangeSet<K> {
    /// Returns `true` if there are no new, modified, or deleted files.
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.modified_files.is_empty() && self.deleted_files.is_empty()
    }

    /// Returns the number of files that need reprocessing (new + modified).
    pub fn dirty_count(&self) -> usize {
        self.new_files.len() + self.modified_files.len()
    }
}

/// Utility for computing file fingerprints and detecting changes.
pub struct SourceHasher;

impl SourceHasher {
    /// Computes the content hash of a single file's raw bytes.
    pub fn hash_file(path: &Path) -> Result<ContentHash, CacheError> {
        let content =
            retry_once(|| std::fs::read(path)).map_err(|e| CacheError::from_io(path, e))?;
        Ok(ContentHash::from_bytes(&content))
    }

    /// Computes content hashes for many files in parallel.
    ///
    /// Files that cannot be read are skipped; they show up as deleted when
    /// the result is compared with an earlier map.
    pub fn hash_files(paths: &[PathBuf]) -> BTreeMap<PathBuf, ContentHash> {
        paths
            .par_iter()
            .filter_map(|p| Self::hash_file(p).ok().map(|h| (p.clone(), h)))
            .collect()
    }

    /// Returns a `size-mtime` stat fingerprint, or `None` if the file is gone.
    ///
    /// Used for resources, where reading the whole file to hash it is not
    /// worth it.
    pub fn probe_stamp(path: &Path) -> Option<String> {
        let meta = std::fs::metadata(path).ok()?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Some(format!("{}-{}", meta.len(), mtime))
    }

    /// Compares current fingerprints with previous ones.
    pub fn detect_changes<K, V>(
        current: &BTreeMap<K, V>,
        previous: &BTreeMap<K, V>,
    ) -> ChangeSet<K>
    where
        K: Ord + Clone,
        V: PartialEq,
    {
        let mut new_files = Vec::new();
        let mut modified_files = Vec::new();
        let mut unchanged_files = Vec::new();

        for (key, fingerprint) in current {
            match previous.get(key) {
                Some(old) if old == fingerprint => unchanged_files.push(key.clone()),
                Some(_) => modified_files.push(key.clone()),
                None => new_files.push(key.clone()),
            }
        }
        let deleted_files = previous
            .keys()
            .filter(|k| !current.contains_key(*k))
            .cloned()
            .collect();

        ChangeSet {
            new_files,
            modified_files,
            deleted_files,
            unchanged_files,
        }
    }
}
