//! Golden test file model: recorded inputs with expected outputs or assertions.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertionKind {
    Contains,
    Matches,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub kind: AssertionKind,
    /// Dotted path into the output, e.g. `result.items.0.name`; empty means the whole output
    #[serde(default)]
    pub path: String,
    pub value: Value,
}

/// One recorded case. Exactly one of `expected` / `assertion` must be set;
/// `"expected": null` counts as set (the skill must print nothing or `null`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenTestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<Assertion>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl GoldenTestCase {
    /// Deserialize and check the one-of rule.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let case: GoldenTestCase =
            serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        case.validate()?;
        Ok(case)
    }

    pub fn validate(&self) -> Result<(), String> {
        match (&self.expected, &self.assertion) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (None, None) => Err("test case has neither 'expected' nor 'assertion'".to_string()),
            (Some(_), Some(_)) => {
                Err("test case sets both 'expected' and 'assertion'; pick one".to_string())
            }
        }
    }

    /// Display label: the case name, or `#<index>`.
    pub fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("#{}", index),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GoldenFileError {
    #[error("failed to read golden test file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("golden test file {path} is not valid JSON: {message}")]
    InvalidJson { path: String, message: String },
    #[error("golden test file {path} must be a JSON array, found {found}")]
    NotAnArray { path: String, found: &'static str },
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read the raw cases. `Ok(None)` when the file is absent or blank.
pub fn read_golden_file(path: &Path) -> Result<Option<Vec<Value>>, GoldenFileError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|source| GoldenFileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    let value: Value =
        serde_json::from_str(&content).map_err(|e| GoldenFileError::InvalidJson {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    match value {
        Value::Array(cases) => Ok(Some(cases)),
        other => Err(GoldenFileError::NotAnArray {
            path: path.display().to_string(),
            found: json_type_name(&other),
        }),
    }
}

/// Cases that deserialize and pass the one-of rule; the rest are skipped.
pub fn load_valid_cases(path: &Path) -> Vec<GoldenTestCase> {
    match read_golden_file(path) {
        Ok(Some(raw)) => raw
            .iter()
            .filter_map(|v| GoldenTestCase::from_value(v).ok())
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => {
            tracing::debug!("{}", e);
            Vec::new()
        }
    }
}

/// One failed case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFailure {
    /// Position in the golden file; `None` for file-level failures
    pub index: Option<usize>,
    pub name: Option<String>,
    pub message: String,
}

impl std::fmt::Display for TestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.name, self.index) {
            (Some(name), _) => write!(f, "[{}] {}", name, self.message),
            (None, Some(i)) => write!(f, "[#{}] {}", i, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

/// Aggregate outcome of one golden test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub ok: bool,
    pub passed: usize,
    pub failed: usize,
    pub failures: Vec<TestFailure>,
}

impl Default for TestResult {
    fn default() -> Self {
        Self::vacuous()
    }
}

impl TestResult {
    /// No tests to run counts as passing.
    pub fn vacuous() -> Self {
        Self {
            ok: true,
            passed: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }

    /// A run that could not start at all (unreadable file, unparsable manifest).
    pub fn aborted(message: impl Into<String>) -> Self {
        let mut result = Self::vacuous();
        result.record_failure(None, None, message);
        result
    }

    pub fn record_pass(&mut self) {
        self.passed += 1;
    }

    pub fn record_failure(
        &mut self,
        index: Option<usize>,
        name: Option<String>,
        message: impl Into<String>,
    ) {
        self.failed += 1;
        self.ok = false;
        self.failures.push(TestFailure {
            index,
            name,
            message: message.into(),
        });
    }

    pub fn first_failure(&self) -> Option<&TestFailure> {
        self.failures.first()
    }
}
