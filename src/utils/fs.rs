//! Directory walking shared by test discovery and the module map

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Directories never descended into
const SKIPPED_DIRS: &[&str] = &["node_modules", "target"];

/// Collect every regular file below `root`, sorted.
///
/// Hidden entries and [`SKIPPED_DIRS`] are ignored. Unreadable directories
/// are skipped rather than failing the walk.
pub fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("skipping {}: {}", dir.display(), e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }

            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                if !SKIPPED_DIRS.contains(&name.as_ref()) {
                    pending.push(entry.path());
                }
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    files
}

/// Whether `path`, relative to `root`, goes through a hidden or skipped entry
pub fn is_ignored(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
    })
}

/// True when `path` currently exists as a regular file
pub fn is_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_walk_skips_hidden_and_vendor_dirs() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join("node_modules/dep")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("src/a.js"), "").unwrap();
        fs::write(root.join("src/nested/b.js"), "").unwrap();
        fs::write(root.join("node_modules/dep/c.js"), "").unwrap();
        fs::write(root.join(".git/HEAD"), "").unwrap();
        fs::write(root.join(".hidden.js"), "").unwrap();

        let files = walk_files(root);
        assert_eq!(
            files,
            vec![root.join("src/a.js"), root.join("src/nested/b.js")]
        );
    }

    #[test]
    fn test_walk_missing_root() {
        assert!(walk_files(Path::new("/definitely/not/here")).is_empty());
    }

    #[test]
    fn test_is_ignored() {
        let root = Path::new("/repo");
        assert!(is_ignored(root, Path::new("/repo/.git/index")));
        assert!(is_ignored(root, Path::new("/repo/node_modules/dep/a.js")));
        assert!(is_ignored(root, Path::new("/repo/src/.a.js.swp")));
        assert!(!is_ignored(root, Path::new("/repo/src/a.js")));
        assert!(!is_ignored(root, Path::new("/elsewhere/.git")));
    }

    #[test]
    fn test_is_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("x.txt");
        assert!(!is_file(&file));
        fs::write(&file, "x").unwrap();
        assert!(is_file(&file));
        assert!(!is_file(dir.path()));
    }
}
