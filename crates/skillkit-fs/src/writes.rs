use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use skillkit_core::observability;

use crate::allowlist::WriteAllowlist;
use crate::error::PatchError;

/// One full-file replacement, path relative to the skill root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

impl FileWrite {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Relative paths a patch wrote or removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedPatch {
    pub written: Vec<String>,
    pub removed: Vec<String>,
}

impl AppliedPatch {
    pub fn files(&self) -> Vec<String> {
        self.written.iter().chain(self.removed.iter()).cloned().collect()
    }
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
pub fn atomic_write(path: &Path, content: &str) -> Result<(), PatchError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PatchError::io(parent, e))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".skillkit-tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, content).map_err(|e| PatchError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        PatchError::io(path, e)
    })
}

#[cfg(unix)]
pub(crate) fn mark_executable_if_script(rel: &Path, abs: &Path) -> Result<(), PatchError> {
    use std::os::unix::fs::PermissionsExt;
    if !rel.starts_with("scripts") {
        return Ok(());
    }
    let mut perms = std::fs::metadata(abs)
        .map_err(|e| PatchError::io(abs, e))?
        .permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(abs, perms).map_err(|e| PatchError::io(abs, e))
}

#[cfg(not(unix))]
pub(crate) fn mark_executable_if_script(_rel: &Path, _abs: &Path) -> Result<(), PatchError> {
    Ok(())
}

/// Overwrite each target with its full content.
///
/// All paths are validated first; a single bad path rejects the whole set
/// before any file is written.
pub fn apply_writes(
    skill_root: &Path,
    writes: &[FileWrite],
    allowlist: &WriteAllowlist,
) -> Result<AppliedPatch, PatchError> {
    let targets: Vec<(PathBuf, &FileWrite)> = writes
        .iter()
        .map(|w| allowlist.check_on_disk(skill_root, &w.path).map(|rel| (rel, w)))
        .collect::<Result<_, _>>()?;

    let mut applied = AppliedPatch::default();
    for (rel, write) in targets {
        let abs = skill_root.join(&rel);
        atomic_write(&abs, &write.content)?;
        mark_executable_if_script(&rel, &abs)?;
        applied.written.push(rel.to_string_lossy().into_owned());
    }

    tracing::info!(
        skill_root = %skill_root.display(),
        files = applied.written.len(),
        "applied full-file writes"
    );
    observability::audit_patch_applied(
        &skill_root.display().to_string(),
        "writes",
        &applied.files(),
    );
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writes_are_idempotent() {
        let tmp = TempDir::new().unwrap();
        let writes = vec![
            FileWrite::new("SKILL.md", "---\nname: x1\ndescription: d\n---\n"),
            FileWrite::new("scripts/run.py", "print('{}')\n"),
        ];
        let allow = WriteAllowlist::default();
        let first = apply_writes(tmp.path(), &writes, &allow).unwrap();
        let snapshot = std::fs::read_to_string(tmp.path().join("scripts/run.py")).unwrap();
        let second = apply_writes(tmp.path(), &writes, &allow).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("scripts/run.py")).unwrap(),
            snapshot
        );
        assert_eq!(first.written, vec!["SKILL.md", "scripts/run.py"]);
    }

    #[test]
    fn test_one_bad_path_rejects_the_whole_set() {
        let tmp = TempDir::new().unwrap();
        let writes = vec![
            FileWrite::new("scripts/ok.sh", "echo ok"),
            FileWrite::new("../escape.sh", "echo no"),
        ];
        let err = apply_writes(tmp.path(), &writes, &WriteAllowlist::default()).unwrap_err();
        assert!(matches!(err, PatchError::PathTraversal(_)));
        assert!(!tmp.path().join("scripts/ok.sh").exists());

        let writes = vec![FileWrite::new("Cargo.toml", "")];
        let err = apply_writes(tmp.path(), &writes, &WriteAllowlist::default()).unwrap_err();
        assert!(matches!(err, PatchError::DisallowedWritePath(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_scripts_become_executable() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let writes = vec![
            FileWrite::new("scripts/tool", "#!/bin/sh\n"),
            FileWrite::new("resources/data.txt", "x"),
        ];
        apply_writes(tmp.path(), &writes, &WriteAllowlist::default()).unwrap();
        let mode = |p: &str| std::fs::metadata(tmp.path().join(p)).unwrap().permissions().mode();
        assert_ne!(mode("scripts/tool") & 0o111, 0);
        assert_eq!(mode("resources/data.txt") & 0o111, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_dir_cannot_redirect_writes() {
        let outside = TempDir::new().unwrap();
        let tmp = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("scripts")).unwrap();

        let writes = vec![
            FileWrite::new("SKILL.md", "---\nname: x1\ndescription: d\n---\n"),
            FileWrite::new("scripts/evil.sh", "echo pwned"),
        ];
        let err = apply_writes(tmp.path(), &writes, &WriteAllowlist::default()).unwrap_err();
        assert!(matches!(err, PatchError::PathTraversal(ref p) if p == "scripts/evil.sh"));
        assert!(!outside.path().join("evil.sh").exists());
        assert!(!tmp.path().join("SKILL.md").exists());
    }
}
