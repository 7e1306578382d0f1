//! Path validation utilities.
//!
//! Ensures declared and resolved paths stay within a skill root. Containment
//! is checked per path component (`Path::starts_with`), so a sibling that
//! merely shares a string prefix (`/a/b-evil` vs `/a/b`) never counts as
//! nested.

use std::path::{Component, Path, PathBuf};

/// A path that resolves outside the root it must stay under.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("path '{path}' escapes root '{root}'")]
pub struct PathTraversal {
    pub path: String,
    pub root: String,
}

/// Make `path` absolute against the current directory without touching disk.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_lexically(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        normalize_lexically(&cwd.join(path))
    }
}

/// Resolve `.` and `..` components lexically. `..` never climbs above the
/// filesystem root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// True when `candidate` equals `root` or is nested under it.
pub fn is_within_root(root: &Path, candidate: &Path) -> bool {
    let root = absolutize(root);
    let candidate = absolutize(candidate);
    candidate == root || candidate.starts_with(&root)
}

/// Join `rel` onto `root` (absolute `rel` replaces it) and check containment.
pub fn resolve_within_root(root: &Path, rel: &str) -> Result<PathBuf, PathTraversal> {
    let root_abs = absolutize(root);
    let resolved = absolutize(&root_abs.join(rel));
    if is_within_root(&root_abs, &resolved) {
        Ok(resolved)
    } else {
        Err(PathTraversal {
            path: rel.to_string(),
            root: root_abs.display().to_string(),
        })
    }
}

/// Like [`resolve_within_root`], then re-checks against canonical paths when
/// the target exists so symlinks cannot point outside the root.
pub fn resolve_existing_within_root(root: &Path, rel: &str) -> Result<PathBuf, PathTraversal> {
    let resolved = resolve_within_root(root, rel)?;
    if let (Ok(canonical_root), Ok(canonical)) = (root.canonicalize(), resolved.canonicalize()) {
        if !is_within_root(&canonical_root, &canonical) {
            return Err(PathTraversal {
                path: rel.to_string(),
                root: canonical_root.display().to_string(),
            });
        }
    }
    Ok(resolved)
}

/// Containment check for a path about to be written, which may not exist yet.
///
/// The deepest existing ancestor of the target (or the target itself, when it
/// exists) is canonicalized and must stay under the canonical root, so a
/// symlinked directory or file cannot redirect the write outside. A dangling
/// symlink on the way is rejected.
pub fn resolve_writable_within_root(root: &Path, rel: &str) -> Result<PathBuf, PathTraversal> {
    let resolved = resolve_within_root(root, rel)?;
    let Ok(canonical_root) = root.canonicalize() else {
        // Root not created yet: nothing on disk can redirect the write
        return Ok(resolved);
    };
    let escape = || PathTraversal {
        path: rel.to_string(),
        root: canonical_root.display().to_string(),
    };

    let mut existing = resolved.as_path();
    while existing.symlink_metadata().is_err() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => return Ok(resolved),
        }
    }
    let canonical = existing.canonicalize().map_err(|_| escape())?;
    if is_within_root(&canonical_root, &canonical) {
        Ok(resolved)
    } else {
        Err(escape())
    }
}
