use std::path::{Component, Path, PathBuf};

use skillkit_core::path_validation::resolve_writable_within_root;

use crate::error::PatchError;

/// Files a patch may write by default.
pub const DEFAULT_ALLOWED_FILES: &[&str] = &["SKILL.md", "policy.yaml"];

/// Subtrees a patch may write by default.
pub const DEFAULT_ALLOWED_DIRS: &[&str] = &["scripts", "tests", "resources"];

/// Which relative paths inside a skill directory a patch may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAllowlist {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}

impl Default for WriteAllowlist {
    fn default() -> Self {
        Self {
            files: DEFAULT_ALLOWED_FILES.iter().map(|s| s.to_string()).collect(),
            dirs: DEFAULT_ALLOWED_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl WriteAllowlist {
    /// Validate `rel` and return it in normalized relative form.
    ///
    /// Absolute paths and `..` components are traversal; anything else not
    /// matching a listed file or nested under a listed directory is disallowed.
    pub fn check(&self, rel: &str) -> Result<PathBuf, PatchError> {
        let trimmed = rel.trim();
        if trimmed.is_empty() {
            return Err(PatchError::DisallowedWritePath(rel.to_string()));
        }
        let path = Path::new(trimmed);
        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(PatchError::PathTraversal(rel.to_string()))
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(PatchError::DisallowedWritePath(rel.to_string()));
        }

        let allowed_file = self.files.iter().any(|f| normalized == Path::new(f));
        // A listed directory itself is not a writable file; only its contents are
        let allowed_dir = self
            .dirs
            .iter()
            .any(|d| normalized.starts_with(d) && normalized != Path::new(d));
        if allowed_file || allowed_dir {
            Ok(normalized)
        } else {
            Err(PatchError::DisallowedWritePath(rel.to_string()))
        }
    }

    /// [`check`](Self::check), then make sure nothing already on disk under
    /// `skill_root` (a symlinked directory or file) redirects the write outside.
    pub fn check_on_disk(&self, skill_root: &Path, rel: &str) -> Result<PathBuf, PatchError> {
        let normalized = self.check(rel)?;
        resolve_writable_within_root(skill_root, &normalized.to_string_lossy())
            .map_err(|_| PatchError::PathTraversal(rel.to_string()))?;
        Ok(normalized)
    }
}
