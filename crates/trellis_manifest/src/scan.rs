//! Role-folder scanning.

use std::collections::BTreeMap;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::ManifestError;
use crate::model::{FileRole, FileType};

/// A file found by [`scan_module`], before fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScannedFile {
    /// Path relative to the module folder, `/`-separated.
    pub path: String,
    /// File type.
    pub file_type: FileType,
}

const ROLE_FOLDERS: [(&str, FileRole); 5] = [
    ("src", FileRole::Src),
    ("test", FileRole::Test),
    ("support", FileRole::Support),
    ("bin", FileRole::Bin),
    ("resources", FileRole::Resources),
];

/// Scans a module folder and classifies its files by role.
///
/// Root-level `index.*` and `__index__.*` files are entry points; the role
/// folders are walked recursively. Hidden entries and nested `node_modules`
/// folders are skipped. Files under `support/` whose name starts with
/// `transformer` get the transformer role.
pub fn scan_module(dir: &Path) -> Result<BTreeMap<FileRole, Vec<ScannedFile>>, ManifestError> {
    let mut roles: BTreeMap<FileRole, Vec<ScannedFile>> = BTreeMap::new();

    let entries = std::fs::read_dir(dir).map_err(|e| ManifestError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let stem = name.split('.').next().unwrap_or("");
        if stem == "index" || stem == "__index__" {
            roles.entry(FileRole::Index).or_default().push(ScannedFile {
                file_type: FileType::from_path(&path),
                path: name,
            });
        }
    }

    for (folder, role) in ROLE_FOLDERS {
        let root = dir.join(folder);
        if !root.is_dir() {
            continue;
        }
        let walker = WalkDir::new(&root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0 || !(name.starts_with('.') || name == "node_modules")
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(folder = %root.display(), "skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let role = if role == FileRole::Support
                && entry.file_name().to_string_lossy().starts_with("transformer")
            {
                FileRole::Transformer
            } else {
                role
            };
            roles.entry(role).or_default().push(ScannedFile {
                file_type: FileType::from_path(entry.path()),
                path: relative,
            });
        }
    }

    for files in roles.values_mut() {
        files.sort();
    }
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, rel).unwrap();
    }

    fn paths(roles: &BTreeMap<FileRole, Vec<ScannedFile>>, role: FileRole) -> Vec<&str> {
        roles
            .get(&role)
            .map(|v| v.iter().map(|f| f.path.as_str()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn classifies_roles() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        for rel in [
            "index.ts",
            "__index__.js",
            "package.json",
            "src/a.ts",
            "src/nested/b.ts",
            "src/types.d.ts",
            "test/a.test.ts",
            "support/helpers.ts",
            "support/transformer.ts",
            "support/transformer-env.ts",
            "bin/cli.ts",
            "resources/logo.png",
            "docs/guide.md",
        ] {
            touch(root, rel);
        }
        let roles = scan_module(root).unwrap();
        assert_eq!(paths(&roles, FileRole::Index), vec!["__index__.js", "index.ts"]);
        assert_eq!(
            paths(&roles, FileRole::Src),
            vec!["src/a.ts", "src/nested/b.ts", "src/types.d.ts"]
        );
        assert_eq!(paths(&roles, FileRole::Test), vec!["test/a.test.ts"]);
        assert_eq!(paths(&roles, FileRole::Support), vec!["support/helpers.ts"]);
        assert_eq!(
            paths(&roles, FileRole::Transformer),
            vec!["support/transformer-env.ts", "support/transformer.ts"]
        );
        assert_eq!(paths(&roles, FileRole::Bin), vec!["bin/cli.ts"]);
        assert_eq!(paths(&roles, FileRole::Resources), vec!["resources/logo.png"]);
        let types = &roles[&FileRole::Src][2];
        assert_eq!(types.file_type, FileType::Typings);
    }

    #[test]
    fn skips_hidden_and_node_modules() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "src/.cache/x.ts");
        touch(tmp.path(), "src/node_modules/dep/index.js");
        touch(tmp.path(), "src/ok.ts");
        let roles = scan_module(tmp.path()).unwrap();
        assert_eq!(paths(&roles, FileRole::Src), vec!["src/ok.ts"]);
    }

    #[test]
    fn empty_module() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "package.json");
        assert!(scan_module(tmp.path()).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "src/a.ts");
        std::os::unix::fs::symlink(tmp.path().join("src"), tmp.path().join("src/again")).unwrap();
        let roles = scan_module(tmp.path()).unwrap();
        assert_eq!(paths(&roles, FileRole::Src), vec!["src/a.ts"]);
    }

    #[test]
    fn missing_folder_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            scan_module(&tmp.path().join("gone")),
            Err(ManifestError::Io { .. })
        ));
    }
}
