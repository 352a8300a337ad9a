//! Lexical path helpers.

use std::path::{Component, Path, PathBuf};

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the filesystem and does not follow symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => result.push(component),
        }
    }
    result
}

/// Join a relative path recorded in checkpoint metadata onto `root`.
///
/// Returns `None` when `relative` is absolute or climbs out of `root`, so a
/// tampered `meta.json` cannot make a restore write outside the project.
pub fn contained_path(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if relative.is_absolute() || relative.has_root() {
        return None;
    }

    let root = normalize_path(root);
    let joined = normalize_path(&root.join(relative));
    if joined == root || !joined.starts_with(&root) {
        return None;
    }
    Some(joined)
}
