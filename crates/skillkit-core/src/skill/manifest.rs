//! In-memory skill manifest: the declared contract of one skill directory.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::golden::GoldenTestCase;
use super::policy::Policy;
use crate::path_validation::{resolve_within_root, PathTraversal};

/// Manifest document inside every skill directory.
pub const MANIFEST_FILE_NAME: &str = "SKILL.md";

/// Policy document inside every skill directory.
pub const POLICY_FILE_NAME: &str = "policy.yaml";

/// Golden test file used when the manifest has no `tests` key.
pub const DEFAULT_TESTS_FILE: &str = "tests/golden.json";

/// Version assumed when the manifest does not declare one.
pub const DEFAULT_VERSION: &str = "0.1.0";

/// Parsed, immutable view of a skill's `SKILL.md` plus its policy and tests.
///
/// A reload never mutates an existing `Manifest`; it builds a new one.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    /// Kebab-case identifier
    pub name: String,
    pub description: String,
    pub version: String,
    pub authors: Vec<String>,
    /// Capabilities the skill expects from its host, e.g. `Bash(git:*)`
    pub declared_tools: Vec<String>,
    /// Entrypoint scripts relative to the skill directory; the first one runs
    pub entrypoints: Vec<String>,
    /// Declared shape of the JSON payload written to stdin
    pub input_schema: Value,
    /// Declared shape of the JSON document read from stdout
    pub output_schema: Value,
    pub policy: Policy,
    /// Golden test file relative to the skill directory
    pub tests_file: String,
    pub test_cases: Vec<GoldenTestCase>,
    /// Free text after the metadata block
    pub body: String,
    /// Metadata keys this runtime does not interpret, kept verbatim
    pub extensions: BTreeMap<String, Value>,
    /// Directory the manifest was loaded from
    pub skill_dir: PathBuf,
}

impl Manifest {
    pub fn skill_dir(&self) -> &Path {
        &self.skill_dir
    }

    pub fn first_entrypoint(&self) -> Option<&str> {
        self.entrypoints.first().map(String::as_str)
    }

    /// Golden test file, refused when `tests` points outside the skill directory.
    pub fn tests_path(&self) -> Result<PathBuf, PathTraversal> {
        resolve_within_root(&self.skill_dir, &self.tests_file)
    }
}
