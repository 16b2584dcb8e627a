//! Path normalization for filesystem checks

use std::path::{Component, Path, PathBuf};

use super::model::has_traversal;

/// Why a path could not be normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// A `..` segment appeared anywhere in the input
    Traversal,
    /// Empty input
    Empty,
}

/// Clean `path` and resolve it against `base`
///
/// Any `..` segment is rejected before resolution, whether leading or
/// embedded, so `/workspace/a/../b` is refused even though it stays inside
/// the workspace. `.` segments and repeated separators are dropped.
pub fn normalize_path(base: &Path, path: &str) -> Result<String, PathError> {
    if path.trim().is_empty() {
        return Err(PathError::Empty);
    }
    if has_traversal(path) {
        return Err(PathError::Traversal);
    }

    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };

    let mut clean = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            // Only reachable through `base` itself
            Component::ParentDir => return Err(PathError::Traversal),
            other => clean.push(other.as_os_str()),
        }
    }

    Ok(clean.to_string_lossy().into_owned())
}
