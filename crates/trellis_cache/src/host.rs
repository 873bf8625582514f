//! The compiler host seam and its caching implementation.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use trellis_common::{ContentHash, TRELLIS_VERSION};

use crate::artifact::{encode_path_key, ArtifactStore, CacheEntry};
use crate::error::CacheError;
use crate::preprocess::{IdentityPreprocessor, Preprocessor};
use crate::retry::retry_once;

/// File access offered to a toolchain during compilation.
pub trait CompilerHost {
    /// Reads a file, preprocessed if it is a recognized source type.
    fn read_file(&mut self, path: &Path) -> Result<String, CacheError>;

    /// Writes compiled output. `source` names the file the output was
    /// compiled from, if any.
    fn write_file(
        &mut self,
        path: &Path,
        content: &str,
        source: Option<&Path>,
    ) -> Result<(), CacheError>;

    /// Returns `true` if the file exists in memory or on disk.
    fn file_exists(&self, path: &Path) -> bool;
}

/// Returns `true` for file types that go through the preprocessor.
pub fn is_source_path(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if name.ends_with(".d.ts") {
        return false;
    }
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("ts" | "tsx" | "mts" | "cts" | "js" | "jsx" | "mjs" | "cjs")
    )
}

/// Lexically removes `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// In-memory plus on-disk cache of sources and compiled outputs.
///
/// Owned by a single build session; nothing here is shared between
/// sessions or threads.
pub struct SourceCache {
    store: ArtifactStore,
    preprocessor: Box<dyn Preprocessor>,
    sources: HashMap<PathBuf, String>,
    outputs: HashMap<PathBuf, String>,
    hashes: HashMap<PathBuf, ContentHash>,
}

impl SourceCache {
    /// Creates a cache persisting entries under `cache_dir`.
    pub fn new(cache_dir: &Path, preprocessor: Box<dyn Preprocessor>) -> Self {
        Self {
            store: ArtifactStore::new(cache_dir, TRELLIS_VERSION),
            preprocessor,
            sources: HashMap::new(),
            outputs: HashMap::new(),
            hashes: HashMap::new(),
        }
    }

    /// Creates a cache without preprocessing.
    pub fn without_preprocessing(cache_dir: &Path) -> Self {
        Self::new(cache_dir, Box::new(IdentityPreprocessor))
    }

    /// Returns the preprocessor in use.
    pub fn preprocessor(&self) -> &dyn Preprocessor {
        self.preprocessor.as_ref()
    }

    /// Reports whether `path` differs from the source its last output was
    /// compiled from.
    ///
    /// Hashes `content` when given, otherwise the raw bytes on disk. The
    /// stored hash is looked up in memory first, then in the persisted entry.
    /// A file with no stored hash is always changed.
    pub fn hash_changed(&mut self, path: &Path, content: Option<&str>) -> Result<bool, CacheError> {
        let path = normalize_path(path);
        let current = match content {
            Some(text) => ContentHash::from_bytes(text.as_bytes()),
            None => {
                let bytes = retry_once(|| std::fs::read(&path))
                    .map_err(|e| CacheError::from_io(&path, e))?;
                ContentHash::from_bytes(&bytes)
            }
        };
        Ok(match self.stored_hash(&path) {
            Some(stored) => stored != current,
            None => true,
        })
    }

    /// Returns the compiled output recorded for `source` if the source is unchanged.
    pub fn cached_output(&mut self, source: &Path) -> Option<String> {
        let source = normalize_path(source);
        if self.hash_changed(&source, None).unwrap_or(true) {
            return None;
        }
        self.store
            .read_entry(&encode_path_key(&source))
            .map(|entry| entry.compiled_content)
    }

    /// Drops `path` from every in-memory table and, if `unlink`, deletes its
    /// persisted entry.
    pub fn unload(&mut self, path: &Path, unlink: bool) -> Result<(), CacheError> {
        let path = normalize_path(path);
        self.sources.remove(&path);
        self.outputs.remove(&path);
        self.hashes.remove(&path);
        if unlink {
            self.store.remove_entry(&encode_path_key(&path))?;
        }
        Ok(())
    }

    /// Clears all in-memory state. Persisted entries are kept.
    pub fn reset(&mut self) {
        self.sources.clear();
        self.outputs.clear();
        self.hashes.clear();
    }

    /// Deletes every persisted entry and clears all in-memory state.
    pub fn clear_disk(&mut self) -> Result<(), CacheError> {
        self.reset();
        self.store.clear()
    }

    /// Deletes persisted entries for sources not in `live`. Returns the number removed.
    pub fn gc<'a>(&self, live: impl IntoIterator<Item = &'a Path>) -> Result<usize, CacheError> {
        let keys: HashSet<String> = live
            .into_iter()
            .map(|p| encode_path_key(&normalize_path(p)))
            .collect();
        self.store.gc(&keys)
    }

    fn stored_hash(&mut self, path: &Path) -> Option<ContentHash> {
        if let Some(hash) = self.hashes.get(path) {
            return Some(*hash);
        }
        let entry = self.store.read_entry(&encode_path_key(path))?;
        self.hashes.insert(path.to_path_buf(), entry.content_hash);
        Some(entry.content_hash)
    }
}

impl CompilerHost for SourceCache {
    fn read_file(&mut self, path: &Path) -> Result<String, CacheError> {
        let path = normalize_path(path);
        if let Some(text) = self.outputs.get(&path).or_else(|| self.sources.get(&path)) {
            return Ok(text.clone());
        }
        let raw = retry_once(|| std::fs::read_to_string(&path))
            .map_err(|e| CacheError::from_io(&path, e))?;
        let text = if is_source_path(&path) {
            self.preprocessor.preprocess(&path, &raw)
        } else {
            raw
        };
        self.sources.insert(path, text.clone());
        Ok(text)
    }

    fn write_file(
        &mut self,
        path: &Path,
        content: &str,
        source: Option<&Path>,
    ) -> Result<(), CacheError> {
        let path = normalize_path(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        retry_once(|| std::fs::write(&path, content)).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e,
        })?;
        self.outputs.insert(path.clone(), content.to_string());

        let (key_path, raw_source) = match source {
            Some(src) => {
                let src = normalize_path(src);
                let raw = retry_once(|| std::fs::read_to_string(&src))
                    .map_err(|e| CacheError::from_io(&src, e))?;
                (src, raw)
            }
            None => (path, content.to_string()),
        };
        let content_hash = ContentHash::from_bytes(raw_source.as_bytes());
        self.hashes.insert(key_path.clone(), content_hash);
        let entry = CacheEntry {
            source_path: key_path.clone(),
            source_content: raw_source,
            compiled_content: content.to_string(),
            content_hash,
        };
        self.store.write_entry(&encode_path_key(&key_path), &entry)
    }

    fn file_exists(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        self.outputs.contains_key(&path) || self.sources.contains_key(&path) || path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::LogMarkerPreprocessor;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        cache: SourceCache,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let cache = SourceCache::without_preprocessing(&root.join("cache"));
        Fixture {
            _dir: dir,
            root,
            cache,
        }
    }

    #[test]
    fn normalize_removes_dot_segments() {
        assert_eq!(
            normalize_path(Path::new("/a/./b/../c.ts")),
            PathBuf::from("/a/c.ts")
        );
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
    }

    #[test]
    fn source_path_detection() {
        assert!(is_source_path(Path::new("a.ts")));
        assert!(is_source_path(Path::new("a.mjs")));
        assert!(!is_source_path(Path::new("a.d.ts")));
        assert!(!is_source_path(Path::new("a.json")));
    }

    #[test]
    fn read_missing_is_not_found() {
        let mut f = fixture();
        let err = f.cache.read_file(&f.root.join("nope.ts")).unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }

    #[test]
    fn read_applies_preprocessor_to_sources_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SourceCache::new(&dir.path().join("cache"), Box::new(LogMarkerPreprocessor));
        let ts = dir.path().join("a.ts");
        let json = dir.path().join("a.json");
        std::fs::write(&ts, "console.log(1)").unwrap();
        std::fs::write(&json, "console.log(1)").unwrap();
        assert!(cache.read_file(&ts).unwrap().contains("/*trellis:"));
        assert_eq!(cache.read_file(&json).unwrap(), "console.log(1)");
    }

    #[test]
    fn read_prefers_memory() {
        let mut f = fixture();
        let src = f.root.join("a.ts");
        std::fs::write(&src, "v1").unwrap();
        assert_eq!(f.cache.read_file(&src).unwrap(), "v1");
        std::fs::write(&src, "v2").unwrap();
        assert_eq!(f.cache.read_file(&src).unwrap(), "v1");
        f.cache.unload(&src, false).unwrap();
        assert_eq!(f.cache.read_file(&src).unwrap(), "v2");
    }

    #[test]
    fn write_records_source_hash() {
        let mut f = fixture();
        let src = f.root.join("src/a.ts");
        let out = f.root.join("out/a.js");
        std::fs::create_dir_all(src.parent().unwrap()).unwrap();
        std::fs::write(&src, "export const a: number = 1;").unwrap();

        assert!(f.cache.hash_changed(&src, None).unwrap());
        f.cache
            .write_file(&out, "export const a = 1;", Some(&src))
            .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "export const a = 1;");
        assert!(!f.cache.hash_changed(&src, None).unwrap());
        assert!(f.cache.file_exists(&out));

        std::fs::write(&src, "export const a: number = 2;").unwrap();
        assert!(f.cache.hash_changed(&src, None).unwrap());
    }

    #[test]
    fn hash_changed_with_explicit_content() {
        let mut f = fixture();
        let out = f.root.join("x.js");
        f.cache.write_file(&out, "body", None).unwrap();
        assert!(!f.cache.hash_changed(&out, Some("body")).unwrap());
        assert!(f.cache.hash_changed(&out, Some("body2")).unwrap());
    }

    #[test]
    fn disk_tier_survives_reset() {
        let mut f = fixture();
        let src = f.root.join("a.ts");
        std::fs::write(&src, "a").unwrap();
        f.cache.write_file(&f.root.join("a.js"), "A", Some(&src)).unwrap();
        f.cache.reset();
        assert!(!f.cache.hash_changed(&src, None).unwrap());
        assert_eq!(f.cache.cached_output(&src).as_deref(), Some("A"));
    }

    #[test]
    fn new_cache_instance_reads_disk_tier() {
        let mut f = fixture();
        let src = f.root.join("a.ts");
        std::fs::write(&src, "a").unwrap();
        f.cache.write_file(&f.root.join("a.js"), "A", Some(&src)).unwrap();
        let mut fresh = SourceCache::without_preprocessing(&f.root.join("cache"));
        assert!(!fresh.hash_changed(&src, None).unwrap());
    }

    #[test]
    fn unload_with_unlink_forgets_everything() {
        let mut f = fixture();
        let src = f.root.join("a.ts");
        std::fs::write(&src, "a").unwrap();
        f.cache.write_file(&f.root.join("a.js"), "A", Some(&src)).unwrap();
        f.cache.unload(&src, true).unwrap();
        assert!(f.cache.hash_changed(&src, None).unwrap());
        assert!(f.cache.cached_output(&src).is_none());
    }

    #[test]
    fn clear_disk_invalidates_all() {
        let mut f = fixture();
        let src = f.root.join("a.ts");
        std::fs::write(&src, "a").unwrap();
        f.cache.write_file(&f.root.join("a.js"), "A", Some(&src)).unwrap();
        f.cache.clear_disk().unwrap();
        assert!(f.cache.hash_changed(&src, None).unwrap());
    }

    #[test]
    fn gc_keeps_live_sources() {
        let mut f = fixture();
        let a = f.root.join("a.ts");
        let b = f.root.join("b.ts");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();
        f.cache.write_file(&f.root.join("a.js"), "A", Some(&a)).unwrap();
        f.cache.write_file(&f.root.join("b.js"), "B", Some(&b)).unwrap();
        assert_eq!(f.cache.gc([a.as_path()]).unwrap(), 1);
        f.cache.reset();
        assert!(!f.cache.hash_changed(&a, None).unwrap());
        assert!(f.cache.hash_changed(&b, None).unwrap());
    }

    #[test]
    fn file_exists_checks_memory_and_disk() {
        let mut f = fixture();
        let p = f.root.join("on_disk.txt");
        assert!(!f.cache.file_exists(&p));
        std::fs::write(&p, "x").unwrap();
        assert!(f.cache.file_exists(&p));
    }
}
