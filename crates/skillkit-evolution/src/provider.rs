//! Boundary to whatever produces code for a skill.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use skillkit_fs::{apply_unified_diff, apply_writes, AppliedPatch, FileWrite, PatchError, WriteAllowlist};

use crate::report::RepairReport;

/// What the caller asked for, in natural language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub skill_dir: PathBuf,
    /// Natural-language description of the skill, or of the change for a refine
    pub instruction: String,
}

impl GenerationRequest {
    pub fn new(skill_dir: impl Into<PathBuf>, instruction: impl Into<String>) -> Self {
        Self {
            skill_dir: skill_dir.into(),
            instruction: instruction.into(),
        }
    }
}

/// A provider answer: either full files or a unified diff against the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderOutput {
    Writes(Vec<FileWrite>),
    Patch(String),
}

impl ProviderOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Writes(_) => "writes",
            Self::Patch(_) => "patch",
        }
    }

    /// Apply to `skill_root` through the patch applier.
    pub fn apply(
        &self,
        skill_root: &Path,
        allowlist: &WriteAllowlist,
    ) -> Result<AppliedPatch, PatchError> {
        match self {
            Self::Writes(writes) => apply_writes(skill_root, writes, allowlist),
            Self::Patch(diff) => apply_unified_diff(skill_root, diff, allowlist),
        }
    }
}

/// Code generation for skills. Implementations are opaque to the repair loop;
/// any error they return is folded into the next repair report.
#[async_trait::async_trait]
pub trait SkillProvider: Send + Sync {
    /// Produce the initial files for a new skill.
    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderOutput>;

    /// Produce a fix for the problems in `report`.
    async fn repair(&self, request: &GenerationRequest, report: &RepairReport)
        -> Result<ProviderOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_applies_both_shapes() {
        let tmp = TempDir::new().unwrap();
        let allow = WriteAllowlist::default();

        let writes = ProviderOutput::Writes(vec![FileWrite::new("resources/a.txt", "one\n")]);
        writes.apply(tmp.path(), &allow).unwrap();

        let patch = ProviderOutput::Patch(
            "--- a/resources/a.txt\n+++ b/resources/a.txt\n@@ -1 +1 @@\n-one\n+two\n".to_string(),
        );
        let applied = patch.apply(tmp.path(), &allow).unwrap();
        assert_eq!(applied.written, vec!["resources/a.txt"]);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("resources/a.txt")).unwrap(),
            "two\n"
        );
    }

    #[test]
    fn test_disallowed_write_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let out = ProviderOutput::Writes(vec![FileWrite::new("Makefile", "all:\n")]);
        let err = out.apply(tmp.path(), &WriteAllowlist::default()).unwrap_err();
        assert!(matches!(err, PatchError::DisallowedWritePath(_)));
        assert_eq!(out.kind(), "writes");
    }
}
