//! Declared access policy and the advisory compliance check.
//!
//! The check only rejects declared filesystem paths that escape the skill
//! root. It does nothing about what the executed code does at runtime:
//! file, process and network syscalls are not intercepted. OS-level
//! isolation is a deployment concern.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::manifest::POLICY_FILE_NAME;
use crate::path_validation::resolve_within_root;

/// Path sentinel meaning "the skill workspace itself".
pub const SENTINEL_WORKSPACE: &str = "workspace";

/// Path sentinel meaning "no access".
pub const SENTINEL_NONE: &str = "none";

/// Declared access footprint of a skill. Everything defaults to denied.
///
/// Field names follow `policy.yaml`; the camelCase manifest spellings are
/// accepted as aliases when the policy is inlined into `SKILL.md`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    #[serde(rename = "network", alias = "networkAllowed", alias = "network_allowed")]
    pub network_allowed: bool,
    #[serde(rename = "fs_read", alias = "readablePaths", alias = "readable_paths")]
    pub readable_paths: Vec<String>,
    #[serde(rename = "fs_write", alias = "writablePaths", alias = "writable_paths")]
    pub writable_paths: Vec<String>,
    #[serde(alias = "execAllowlist")]
    pub exec_allowlist: Vec<String>,
    #[serde(rename = "domains_allowlist", alias = "domainAllowlist", alias = "domain_allowlist")]
    pub domain_allowlist: Vec<String>,
}

impl Policy {
    /// Parse a policy document. Blank documents are the default policy.
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn allows_exec(&self, command: &str) -> bool {
        self.exec_allowlist.iter().any(|c| c == command)
    }
}

pub fn is_sentinel(path: &str) -> bool {
    matches!(path.trim(), SENTINEL_WORKSPACE | SENTINEL_NONE)
}

/// Read `policy.yaml`. `Ok(None)` when the file is absent.
pub fn read_policy_file(skill_dir: &Path) -> Result<Option<Policy>, String> {
    let path = skill_dir.join(POLICY_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    Policy::from_yaml_str(&content)
        .map(Some)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    FsReadPathTraversal,
    FsWritePathTraversal,
}

impl ViolationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FsReadPathTraversal => "FS_READ_PATH_TRAVERSAL",
            Self::FsWritePathTraversal => "FS_WRITE_PATH_TRAVERSAL",
        }
    }
}

impl std::fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub code: ViolationCode,
    pub message: String,
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Check every declared read/write path against `skill_root`.
pub fn check_compliance(policy: &Policy, skill_root: &Path) -> Vec<PolicyViolation> {
    let declared = policy
        .readable_paths
        .iter()
        .map(|p| (p, ViolationCode::FsReadPathTraversal, "fs_read"))
        .chain(
            policy
                .writable_paths
                .iter()
                .map(|p| (p, ViolationCode::FsWritePathTraversal, "fs_write")),
        );

    let mut violations = Vec::new();
    for (path, code, field) in declared {
        if is_sentinel(path) {
            continue;
        }
        if let Err(e) = resolve_within_root(skill_root, path.trim()) {
            violations.push(PolicyViolation {
                code,
                message: format!("{} path '{}' resolves outside the skill root ({})", field, path, e.root),
            });
        }
    }
    violations
}
