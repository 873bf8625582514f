//! Persisted cache entries.
//!
//! Each compiled source is recorded as a binary entry under
//! `<cache_dir>/entries/`. An entry file is a 4-byte little-endian header
//! length, a bincode header (magic bytes, format version, Trellis version,
//! payload checksum), and a bincode [`CacheEntry`] payload.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use trellis_common::ContentHash;

use crate::error::CacheError;

/// Magic bytes identifying a Trellis cache entry.
const ENTRY_MAGIC: [u8; 4] = *b"TRLS";

/// Current entry format version. Increment on breaking changes to the
/// header or payload format.
const ENTRY_FORMAT_VERSION: u32 = 1;

/// Subdirectory holding entries.
const ENTRIES_SUBDIR: &str = "entries";

/// File extension of an entry.
const ENTRY_EXT: &str = "entry";

/// Header prepended to every entry for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryHeader {
    magic: [u8; 4],
    format_version: u32,
    trellis_version: String,
    checksum: ContentHash,
}

/// The compiled state of one source file.
///
/// Valid only while the hash of the current raw source equals `content_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Absolute path of the source file.
    pub source_path: PathBuf,
    /// Raw source text the output was compiled from.
    pub source_content: String,
    /// Compiled output text.
    pub compiled_content: String,
    /// Hash of the raw, un-preprocessed source.
    pub content_hash: ContentHash,
}

/// Encodes a path into a flat, reversible file-name key.
///
/// `_` is doubled first so the escapes for `/`, `\`, and `:` cannot collide
/// with underscores already present in the path.
pub fn encode_path_key(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut key = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '_' => key.push_str("__"),
            '/' => key.push_str("_s"),
            '\\' => key.push_str("_b"),
            ':' => key.push_str("_c"),
            other => key.push(other),
        }
    }
    key
}

/// Store for persisted cache entries.
///
/// All reads are fail-safe: a missing, truncated, corrupt, or outdated
/// entry reads as `None`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    cache_dir: PathBuf,
    trellis_version: String,
}

impl ArtifactStore {
    /// Creates a store rooted at the given cache directory.
    pub fn new(cache_dir: &Path, trellis_version: &str) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            trellis_version: trellis_version.to_string(),
        }
    }

    /// Root cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the file path of the entry with the given key.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir
            .join(ENTRIES_SUBDIR)
            .join(format!("{key}.{ENTRY_EXT}"))
    }

    /// Writes an entry under the given key.
    pub fn write_entry(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let dir = self.cache_dir.join(ENTRIES_SUBDIR);
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
            path: dir,
            source: e,
        })?;

        let payload = bincode::serde::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;
        let header = EntryHeader {
            magic: ENTRY_MAGIC,
            format_version: ENTRY_FORMAT_VERSION,
            trellis_version: self.trellis_version.clone(),
            checksum: ContentHash::from_bytes(&payload),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&payload);

        let path = self.entry_path(key);
        std::fs::write(&path, &output).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Reads and validates the entry with the given key.
    pub fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        let raw = std::fs::read(self.entry_path(key)).ok()?;
        if raw.len() < 4 {
            return None;
        }
        let header_len = u32::from_le_bytes(raw[..4].try_into().ok()?) as usize;
        if raw.len() < 4 + header_len {
            return None;
        }

        let header: EntryHeader =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .ok()?
                .0;
        if header.magic != ENTRY_MAGIC
            || header.format_version != ENTRY_FORMAT_VERSION
            || header.trellis_version != self.trellis_version
        {
            return None;
        }

        let payload = &raw[4 + header_len..];
        if ContentHash::from_bytes(payload) != header.checksum {
            return None;
        }
        bincode::serde::decode_from_slice(payload, bincode::config::standard())
            .ok()
            .map(|(entry, _)| entry)
    }

    /// Deletes the entry with the given key. Returns whether a file was removed.
    pub fn remove_entry(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.entry_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io { path, source: e }),
        }
    }

    /// Deletes every entry.
    pub fn clear(&self) -> Result<(), CacheError> {
        let dir = self.cache_dir.join(ENTRIES_SUBDIR);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io {
                path: dir,
                source: e,
            }),
        }
    }

    /// Removes entries whose key is not in `live_keys`. Returns the number removed.
    pub fn gc(&self, live_keys: &HashSet<String>) -> Result<usize, CacheError> {
        let dir = self.cache_dir.join(ENTRIES_SUBDIR);
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        let entries = std::fs::read_dir(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| CacheError::Io {
                path: dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !live_keys.contains(stem) {
                    std::fs::remove_file(&path).map_err(|e| CacheError::Io {
                        path: path.clone(),
                        source: e,
                    })?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}
