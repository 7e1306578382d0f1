//! Skill linter: collects every problem instead of stopping at the first.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;

use super::golden::{read_golden_file, GoldenTestCase};
use super::manifest::MANIFEST_FILE_NAME;
use super::metadata::{
    self, is_exec_capability, parse_allowed_tools, read_metadata, resolve_policy, string_list,
    ParseError, RawMetadata,
};
use super::policy::check_compliance;
use crate::path_validation::resolve_within_root;

/// Descriptions longer than this are flagged.
pub const MAX_DESCRIPTION_CHARS: usize = 1024;

const SCHEMA_TYPES: &[&str] = &[
    "object", "array", "string", "number", "integer", "boolean", "null",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintIssue {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub severity: Severity,
}

impl std::fmt::Display for LintIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.path {
            Some(p) => write!(f, "{} [{}] {}: {}", level, self.code, p, self.message),
            None => write!(f, "{} [{}] {}", level, self.code, self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintResult {
    /// No error-severity issues
    pub ok: bool,
    pub issues: Vec<LintIssue>,
}

impl LintResult {
    fn from_issues(issues: Vec<LintIssue>) -> Self {
        let ok = !issues.iter().any(|i| i.severity == Severity::Error);
        Self { ok, issues }
    }

    pub fn errors(&self) -> impl Iterator<Item = &LintIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LintIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn first_error(&self) -> Option<&LintIssue> {
        self.errors().next()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }
}

#[derive(Default)]
struct Issues(Vec<LintIssue>);

impl Issues {
    fn error(&mut self, code: &str, message: impl Into<String>, path: Option<&str>) {
        self.push(code, message, path, Severity::Error);
    }

    fn warning(&mut self, code: &str, message: impl Into<String>, path: Option<&str>) {
        self.push(code, message, path, Severity::Warning);
    }

    fn push(&mut self, code: &str, message: impl Into<String>, path: Option<&str>, severity: Severity) {
        self.0.push(LintIssue {
            code: code.to_string(),
            message: message.into(),
            path: path.map(str::to_string),
            severity,
        });
    }
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{1,64}$").expect("name regex is valid"))
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d+\.\d+\.\d+(-[0-9A-Za-z.-]+)?$").expect("version regex is valid")
    })
}

pub fn is_valid_name(name: &str) -> bool {
    name_re().is_match(name)
}

pub fn is_valid_version(version: &str) -> bool {
    version_re().is_match(version)
}

/// Lint the skill at `skill_root`. Never fails; problems become issues.
pub fn lint(skill_root: &Path) -> LintResult {
    let mut issues = Issues::default();

    let meta = match read_metadata(skill_root) {
        Ok(meta) => meta,
        Err(e) => {
            let code = match &e {
                ParseError::ManifestNotFound(_) => "MANIFEST_NOT_FOUND",
                ParseError::Io { .. } => "MANIFEST_UNREADABLE",
                ParseError::MissingFrontMatter(_) => "MISSING_FRONT_MATTER",
                ParseError::InvalidYaml(_) => "INVALID_YAML",
                ParseError::NotAMapping(_) => "FRONT_MATTER_NOT_MAPPING",
                ParseError::MissingField(_) => "MISSING_FIELD",
            };
            issues.error(code, e.to_string(), Some(MANIFEST_FILE_NAME));
            return LintResult::from_issues(issues.0);
        }
    };

    check_identity(&meta, &mut issues);
    check_lists(&meta, &mut issues);
    check_entrypoints(skill_root, &meta, &mut issues);
    check_policy(skill_root, &meta, &mut issues);
    check_schema(&meta, "inputs", "INVALID_INPUT_SCHEMA", &mut issues);
    check_schema(&meta, "outputs", "INVALID_OUTPUT_SCHEMA", &mut issues);
    check_golden_file(skill_root, &meta, &mut issues);

    let result = LintResult::from_issues(issues.0);
    tracing::debug!(
        skill_root = %skill_root.display(),
        errors = result.error_count(),
        warnings = result.warnings().count(),
        "lint finished"
    );
    result
}

fn check_identity(meta: &RawMetadata, issues: &mut Issues) {
    match meta.get("name") {
        None | Some(Value::Null) => issues.error("MISSING_NAME", "'name' is required", None),
        Some(Value::String(s)) if s.trim().is_empty() => {
            issues.error("MISSING_NAME", "'name' is required", None)
        }
        Some(Value::String(s)) => {
            if !is_valid_name(s) {
                issues.error(
                    "INVALID_NAME",
                    format!(
                        "name '{}' must be 2-65 chars of lowercase letters, digits, '-' or '_', starting with a letter or digit",
                        s
                    ),
                    None,
                );
            }
        }
        Some(_) => issues.error("INVALID_NAME", "'name' must be a string", None),
    }

    match meta.non_empty_str("description") {
        None => issues.error("MISSING_DESCRIPTION", "'description' is required", None),
        Some(d) if d.chars().count() > MAX_DESCRIPTION_CHARS => issues.warning(
            "DESCRIPTION_TOO_LONG",
            format!(
                "description is {} characters; keep it under {}",
                d.chars().count(),
                MAX_DESCRIPTION_CHARS
            ),
            None,
        ),
        Some(_) => {}
    }

    let version = match meta.get("version") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(other) => Some(other.to_string()),
    };
    if let Some(v) = version {
        if !is_valid_version(&v) {
            issues.error(
                "INVALID_VERSION",
                format!("version '{}' must look like MAJOR.MINOR.PATCH[-prerelease]", v),
                None,
            );
        }
    }
}

fn check_lists(meta: &RawMetadata, issues: &mut Issues) {
    if let Some(v) = meta.get("authors") {
        if !v.is_array() && !v.is_null() {
            issues.error("AUTHORS_NOT_ARRAY", "'authors' must be a list", None);
        }
    }
    // The `allowed-tools` spellings conventionally carry a comma-separated string
    if let Some(v) = meta.get("declaredTools") {
        if !v.is_array() && !v.is_null() {
            issues.error("DECLARED_TOOLS_NOT_ARRAY", "'declaredTools' must be a list", None);
        }
    }
}

fn check_entrypoints(skill_root: &Path, meta: &RawMetadata, issues: &mut Issues) {
    let entrypoints = match meta.get("entrypoints").map(string_list) {
        None => Vec::new(),
        Some(Some(list)) => list,
        Some(None) => {
            issues.error(
                "INVALID_ENTRYPOINTS",
                "'entrypoints' must be a list of relative paths",
                None,
            );
            return;
        }
    };
    if entrypoints.is_empty() {
        issues.error(
            "MISSING_ENTRYPOINTS",
            "at least one entrypoint is required",
            None,
        );
        return;
    }

    for entry in &entrypoints {
        let resolved = match resolve_within_root(skill_root, entry) {
            Ok(p) => p,
            Err(e) => {
                issues.error("ENTRYPOINT_PATH_TRAVERSAL", e.to_string(), Some(entry));
                continue;
            }
        };
        if !resolved.is_file() {
            issues.error(
                "ENTRYPOINT_NOT_FOUND",
                format!("entrypoint '{}' does not exist", entry),
                Some(entry),
            );
            continue;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata::ScriptLanguage::from_path(&resolved).is_none() {
                let executable = std::fs::metadata(&resolved)
                    .map(|m| m.permissions().mode() & 0o111 != 0)
                    .unwrap_or(false);
                if !executable {
                    issues.warning(
                        "ENTRYPOINT_NOT_EXECUTABLE",
                        format!(
                            "entrypoint '{}' has no known interpreter extension and is not executable",
                            entry
                        ),
                        Some(entry),
                    );
                }
            }
        }
    }
}

fn check_policy(skill_root: &Path, meta: &RawMetadata, issues: &mut Issues) {
    let (policy, _, policy_err) = resolve_policy(skill_root, meta);
    if let Some(e) = policy_err {
        issues.warning("INVALID_POLICY", format!("{}; using deny-all policy", e), None);
    }

    if policy.network_allowed {
        issues.warning(
            "NETWORK_ALLOWED",
            "policy allows network access; runtime does not enforce this",
            None,
        );
    }

    let tools = metadata::declared_tools(meta);
    if tools.iter().any(|t| is_exec_capability(t)) {
        if policy.exec_allowlist.is_empty() {
            issues.warning(
                "EXEC_WITHOUT_ALLOWLIST",
                "declared tools include an exec capability but exec_allowlist is empty",
                None,
            );
        } else {
            for pattern in tools.iter().flat_map(|t| parse_allowed_tools(t)) {
                if !policy.allows_exec(&pattern.command_prefix) {
                    issues.warning(
                        "EXEC_PREFIX_NOT_ALLOWLISTED",
                        format!(
                            "Bash({}) is declared but '{}' is not in exec_allowlist",
                            pattern.raw_pattern, pattern.command_prefix
                        ),
                        None,
                    );
                }
            }
        }
    }

    for v in check_compliance(&policy, skill_root) {
        issues.error(v.code.as_str(), v.message, None);
    }
}

fn check_schema(meta: &RawMetadata, key: &str, code: &str, issues: &mut Issues) {
    let Some(schema) = meta.get(key) else {
        return;
    };
    let valid = schema
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| SCHEMA_TYPES.contains(&t));
    if !valid {
        issues.warning(
            code,
            format!(
                "'{}' should be a schema object with a 'type' of {}",
                key,
                SCHEMA_TYPES.join("/")
            ),
            None,
        );
    }
}

fn check_golden_file(skill_root: &Path, meta: &RawMetadata, issues: &mut Issues) {
    let tests_file = metadata::tests_file(meta);
    let path = match resolve_within_root(skill_root, &tests_file) {
        Ok(p) => p,
        Err(e) => {
            issues.error("TESTS_PATH_TRAVERSAL", e.to_string(), Some(&tests_file));
            return;
        }
    };
    let cases = match read_golden_file(&path) {
        Ok(Some(cases)) => cases,
        Ok(None) => return,
        Err(e) => {
            issues.error("INVALID_TEST_FILE", e.to_string(), Some(&tests_file));
            return;
        }
    };
    for (index, raw) in cases.iter().enumerate() {
        if let Err(e) = GoldenTestCase::from_value(raw) {
            let label = raw
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", index));
            issues.error(
                "INVALID_TEST_CASE",
                format!("test case {}: {}", label, e),
                Some(&tests_file),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn codes(result: &LintResult) -> Vec<&str> {
        result.issues.iter().map(|i| i.code.as_str()).collect()
    }

    fn minimal_skill() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("scripts")).unwrap();
        fs::write(tmp.path().join("scripts/run.sh"), "cat\n").unwrap();
        fs::write(
            tmp.path().join(MANIFEST_FILE_NAME),
            "---\nname: echo\ndescription: Echo input\nversion: 1.0.0\nentrypoints: [scripts/run.sh]\n---\n",
        )
        .unwrap();
        tmp
    }

    #[test]
    fn test_minimal_skill_is_clean() {
        let tmp = minimal_skill();
        let result = lint(tmp.path());
        assert!(result.ok, "{:?}", result.issues);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_missing_manifest_stops_early() {
        let tmp = TempDir::new().unwrap();
        let result = lint(tmp.path());
        assert!(!result.ok);
        assert_eq!(codes(&result), vec!["MANIFEST_NOT_FOUND"]);
    }

    #[test]
    fn test_no_front_matter() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(MANIFEST_FILE_NAME), "# Title\n").unwrap();
        assert_eq!(codes(&lint(tmp.path())), vec!["MISSING_FRONT_MATTER"]);
    }

    #[test]
    fn test_accumulates_identity_errors() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(MANIFEST_FILE_NAME),
            "---\nversion: one\nauthors: alice\n---\n",
        )
        .unwrap();
        let result = lint(tmp.path());
        let c = codes(&result);
        assert!(c.contains(&"MISSING_NAME"));
        assert!(c.contains(&"MISSING_DESCRIPTION"));
        assert!(c.contains(&"INVALID_VERSION"));
        assert!(c.contains(&"AUTHORS_NOT_ARRAY"));
        assert!(c.contains(&"MISSING_ENTRYPOINTS"));
        assert_eq!(result.first_error().unwrap().code, "MISSING_NAME");
    }

    #[test]
    fn test_name_and_version_formats() {
        assert!(is_valid_name("echo"));
        assert!(is_valid_name("my_skill-2"));
        assert!(!is_valid_name("e"));
        assert!(!is_valid_name("-echo"));
        assert!(!is_valid_name("Echo"));
        assert!(!is_valid_name(&"a".repeat(67)));

        assert!(is_valid_version("1.0.0"));
        assert!(is_valid_version("0.2.10-pre"));
        assert!(!is_valid_version("1.0"));
        assert!(!is_valid_version("v1.0.0"));
    }

    #[test]
    fn test_entrypoint_traversal_and_missing_file() {
        let tmp = minimal_skill();
        fs::write(
            tmp.path().join(MANIFEST_FILE_NAME),
            "---\nname: echo\ndescription: d\nentrypoints: [../outside.sh, scripts/gone.py]\n---\n",
        )
        .unwrap();
        let result = lint(tmp.path());
        let c = codes(&result);
        assert!(c.contains(&"ENTRYPOINT_PATH_TRAVERSAL"));
        assert!(c.contains(&"ENTRYPOINT_NOT_FOUND"));
        assert!(!result.ok);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_binary_entrypoint_warns() {
        let tmp = minimal_skill();
        fs::write(tmp.path().join("scripts/run"), "#!/bin/sh\n").unwrap();
        fs::write(
            tmp.path().join(MANIFEST_FILE_NAME),
            "---\nname: echo\ndescription: d\nentrypoints: [scripts/run]\n---\n",
        )
        .unwrap();
        let result = lint(tmp.path());
        assert!(result.ok);
        assert_eq!(codes(&result), vec!["ENTRYPOINT_NOT_EXECUTABLE"]);
    }

    #[test]
    fn test_policy_warnings_and_violations() {
        let tmp = minimal_skill();
        fs::write(
            tmp.path().join(MANIFEST_FILE_NAME),
            "---\nname: echo\ndescription: d\nentrypoints: [scripts/run.sh]\nallowed-tools: Bash(git:*)\n---\n",
        )
        .unwrap();
        fs::write(
            tmp.path().join("policy.yaml"),
            "network: true\nfs_read: [../sibling]\n",
        )
        .unwrap();
        let result = lint(tmp.path());
        let c = codes(&result);
        assert!(c.contains(&"NETWORK_ALLOWED"));
        assert!(c.contains(&"EXEC_WITHOUT_ALLOWLIST"));
        assert!(c.contains(&"FS_READ_PATH_TRAVERSAL"));
        assert!(!result.ok);

        fs::write(tmp.path().join("policy.yaml"), "exec_allowlist: [npm]\n").unwrap();
        let result = lint(tmp.path());
        assert!(result.ok);
        assert_eq!(codes(&result), vec!["EXEC_PREFIX_NOT_ALLOWLISTED"]);
    }

    #[test]
    fn test_schema_and_description_warnings() {
        let tmp = minimal_skill();
        let long = "x".repeat(MAX_DESCRIPTION_CHARS + 1);
        fs::write(
            tmp.path().join(MANIFEST_FILE_NAME),
            format!(
                "---\nname: echo\ndescription: {}\nentrypoints: [scripts/run.sh]\ninputs:\n  type: thing\noutputs:\n  type: object\n---\n",
                long
            ),
        )
        .unwrap();
        let result = lint(tmp.path());
        assert!(result.ok);
        assert_eq!(
            codes(&result),
            vec!["DESCRIPTION_TOO_LONG", "INVALID_INPUT_SCHEMA"]
        );
    }

    #[test]
    fn test_golden_file_problems_are_errors() {
        let tmp = minimal_skill();
        fs::create_dir_all(tmp.path().join("tests")).unwrap();
        fs::write(tmp.path().join("tests/golden.json"), "{}").unwrap();
        assert_eq!(codes(&lint(tmp.path())), vec!["INVALID_TEST_FILE"]);

        fs::write(
            tmp.path().join("tests/golden.json"),
            r#"[
                {"name": "good", "input": {}, "expected": null},
                {"name": "neither", "input": {}},
                {"input": {}, "assertion": {"kind": "equals", "path": "", "value": 1}}
            ]"#,
        )
        .unwrap();
        let result = lint(tmp.path());
        assert_eq!(result.error_count(), 2);
        assert!(result.issues[0].message.contains("neither"));
        assert!(result.issues[1].message.contains("#2"));
    }
}
