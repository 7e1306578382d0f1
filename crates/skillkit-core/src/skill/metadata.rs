//! SKILL.md front matter reader and manifest parser.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::golden::load_valid_cases;
use super::manifest::{Manifest, DEFAULT_TESTS_FILE, DEFAULT_VERSION, MANIFEST_FILE_NAME};
use super::policy::{read_policy_file, Policy};
use crate::path_validation::{absolutize, resolve_within_root};

/// Front matter keys the runtime interprets. Everything else goes to `extensions`.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "name",
    "description",
    "version",
    "authors",
    "declaredTools",
    "allowed_tools",
    "allowed-tools",
    "entrypoints",
    "inputs",
    "outputs",
    "policy",
    "tests",
];

/// Keys that may carry the declared tool list, in lookup order.
pub const DECLARED_TOOLS_KEYS: &[&str] = &["declaredTools", "allowed_tools", "allowed-tools"];

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("SKILL.md not found in directory: {0}")]
    ManifestNotFound(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("No YAML front matter found in {0}")]
    MissingFrontMatter(String),
    #[error("Failed to parse YAML front matter: {0}")]
    InvalidYaml(String),
    #[error("YAML front matter must be a mapping, found {0}")]
    NotAMapping(&'static str),
    #[error("Missing required field '{0}' in SKILL.md")]
    MissingField(&'static str),
}

/// Raw metadata block of a SKILL.md, converted to JSON values.
#[derive(Debug, Clone)]
pub struct RawMetadata {
    pub fields: Map<String, Value>,
    /// Everything after the closing `---`
    pub body: String,
}

impl RawMetadata {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Non-empty trimmed string value for `key`.
    pub fn non_empty_str(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// First of `keys` present in the block, with the key that matched.
    pub fn first_of<'a>(&self, keys: &[&'a str]) -> Option<(&'a str, &Value)> {
        keys.iter()
            .find_map(|k| self.fields.get(*k).map(|v| (*k, v)))
    }
}

/// Interpreter family of an entrypoint, derived from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLanguage {
    Python,
    Node,
    Bash,
}

impl ScriptLanguage {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "py" => Some(Self::Python),
            "js" | "mjs" | "cjs" => Some(Self::Node),
            "sh" => Some(Self::Bash),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Node => "node",
            Self::Bash => "bash",
        }
    }
}

/// Parsed pattern from `allowed-tools: Bash(git:*)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BashToolPattern {
    /// Command prefix, e.g. "git"
    pub command_prefix: String,
    /// Raw pattern string, e.g. "git:*"
    pub raw_pattern: String,
}

/// Extract every `Bash(...)` pattern from a declared tool string.
///
///   - `"Bash(git:*)"` -> one pattern with prefix `git`
///   - `"Read, Bash(jq)"` -> one pattern with prefix `jq` (non-Bash tools ignored)
pub fn parse_allowed_tools(raw: &str) -> Vec<BashToolPattern> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"Bash\(([^)]+)\)").expect("allowed-tools regex is valid"));

    re.captures_iter(raw)
        .filter_map(|cap| {
            let pattern_str = cap.get(1)?.as_str().trim();
            // "git:*" -> "git"; no colon means the whole string is the prefix
            let command_prefix = match pattern_str.find(':') {
                Some(idx) => pattern_str[..idx].trim(),
                None => pattern_str,
            };
            if command_prefix.is_empty() {
                return None;
            }
            Some(BashToolPattern {
                command_prefix: command_prefix.to_string(),
                raw_pattern: pattern_str.to_string(),
            })
        })
        .collect()
}

/// True for declared tools that let the skill spawn arbitrary commands.
pub fn is_exec_capability(tool: &str) -> bool {
    let tool = tool.trim();
    if tool.starts_with("Bash(") {
        return true;
    }
    matches!(
        tool.to_ascii_lowercase().as_str(),
        "bash" | "exec" | "shell" | "run_command"
    )
}

impl Manifest {
    pub fn bash_patterns(&self) -> Vec<BashToolPattern> {
        self.declared_tools
            .iter()
            .flat_map(|t| parse_allowed_tools(t))
            .collect()
    }

    pub fn declares_exec(&self) -> bool {
        self.declared_tools.iter().any(|t| is_exec_capability(t))
    }
}

fn front_matter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\A---[ \t]*\r?\n(?:(.*?)\r?\n)?---[ \t]*(?:\r?\n|\z)")
            .expect("SKILL.md front matter regex is valid")
    })
}

/// Split a SKILL.md document into its YAML block and body.
pub fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let caps = front_matter_re().captures(content)?;
    let yaml = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    let end = caps.get(0)?.end();
    Some((yaml, &content[end..]))
}

pub(crate) fn yaml_type_name(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "boolean",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged value",
    }
}

fn yaml_key_to_string(key: &serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Convert a YAML value into JSON. Non-scalar mapping keys are dropped.
pub fn yaml_to_json(value: &serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => Value::Array(seq.iter().map(yaml_to_json).collect()),
        serde_yaml::Value::Mapping(map) => Value::Object(
            map.iter()
                .filter_map(|(k, v)| Some((yaml_key_to_string(k)?, yaml_to_json(v))))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// Parse the metadata block of an in-memory SKILL.md document.
pub fn parse_front_matter(content: &str, origin: &str) -> Result<RawMetadata, ParseError> {
    let (yaml, body) =
        split_front_matter(content).ok_or_else(|| ParseError::MissingFrontMatter(origin.to_string()))?;

    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| ParseError::InvalidYaml(e.to_string()))?;
    let fields = match value {
        // An empty block is an empty mapping
        serde_yaml::Value::Null => Map::new(),
        serde_yaml::Value::Mapping(_) => match yaml_to_json(&value) {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        other => return Err(ParseError::NotAMapping(yaml_type_name(&other))),
    };

    Ok(RawMetadata {
        fields,
        body: body.to_string(),
    })
}

/// Read and parse the metadata block of `<skill_root>/SKILL.md`.
pub fn read_metadata(skill_root: &Path) -> Result<RawMetadata, ParseError> {
    let path = skill_root.join(MANIFEST_FILE_NAME);
    if !path.is_file() {
        return Err(ParseError::ManifestNotFound(
            skill_root.display().to_string(),
        ));
    }
    let content = fs::read_to_string(&path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_front_matter(&content, &path.display().to_string())
}

/// Scalar or list of scalars as strings. `None` when the value has another shape.
pub fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Null => Some(Vec::new()),
        Value::String(s) => Some(if s.trim().is_empty() {
            Vec::new()
        } else {
            vec![s.trim().to_string()]
        }),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(scalar_to_string)
                .filter(|s| !s.is_empty())
                .collect(),
        ),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Declared tools. A comma-separated string is split into entries.
pub fn declared_tools(meta: &RawMetadata) -> Vec<String> {
    match meta.first_of(DECLARED_TOOLS_KEYS) {
        Some((_, Value::String(s))) => split_tool_list(s),
        Some((_, v)) => string_list(v).unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Split `"Read, Bash(git:*), Edit"` on commas outside parentheses.
fn split_tool_list(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in raw.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                let t = current.trim();
                if !t.is_empty() {
                    out.push(t.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    let t = current.trim();
    if !t.is_empty() {
        out.push(t.to_string());
    }
    out
}

/// Where the effective policy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySource {
    PolicyFile,
    Inline,
    Default,
}

/// Effective policy: `policy.yaml`, else the inline `policy` key, else deny-all.
///
/// A broken source yields the default policy and its error message.
pub fn resolve_policy(skill_root: &Path, meta: &RawMetadata) -> (Policy, PolicySource, Option<String>) {
    match read_policy_file(skill_root) {
        Ok(Some(policy)) => return (policy, PolicySource::PolicyFile, None),
        Ok(None) => {}
        Err(e) => return (Policy::default(), PolicySource::PolicyFile, Some(e)),
    }
    match meta.get("policy") {
        None | Some(Value::Null) => (Policy::default(), PolicySource::Default, None),
        Some(inline) => match serde_json::from_value::<Policy>(inline.clone()) {
            Ok(policy) => (policy, PolicySource::Inline, None),
            Err(e) => (
                Policy::default(),
                PolicySource::Inline,
                Some(format!("Failed to parse inline policy: {}", e)),
            ),
        },
    }
}

/// Golden test file path relative to the skill root.
pub fn tests_file(meta: &RawMetadata) -> String {
    meta.non_empty_str("tests")
        .unwrap_or(DEFAULT_TESTS_FILE)
        .to_string()
}

fn schema_or_empty(meta: &RawMetadata, key: &str) -> Value {
    match meta.get(key) {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(v) => v.clone(),
    }
}

fn version_string(meta: &RawMetadata) -> String {
    match meta.get("version") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(v @ Value::Number(_)) => v.to_string(),
        _ => DEFAULT_VERSION.to_string(),
    }
}

/// Parse `<skill_root>/SKILL.md` (plus `policy.yaml` and the golden test file)
/// into a [`Manifest`].
///
/// Only a missing file, a missing or malformed metadata block, and missing
/// `name`/`description` are fatal. Everything else defaults permissively;
/// [`super::lint::lint`] reports the rest.
pub fn parse(skill_root: &Path) -> Result<Manifest, ParseError> {
    let meta = read_metadata(skill_root)?;
    build_manifest(skill_root, meta)
}

pub fn build_manifest(skill_root: &Path, meta: RawMetadata) -> Result<Manifest, ParseError> {
    let name = meta
        .non_empty_str("name")
        .ok_or(ParseError::MissingField("name"))?
        .to_string();
    let description = meta
        .non_empty_str("description")
        .ok_or(ParseError::MissingField("description"))?
        .to_string();

    let skill_dir: PathBuf = absolutize(skill_root);
    let (policy, source, policy_err) = resolve_policy(&skill_dir, &meta);
    if let Some(e) = policy_err {
        tracing::warn!("{}; falling back to deny-all policy", e);
    }
    tracing::debug!(skill = %name, ?source, "resolved policy");

    let tests_file = tests_file(&meta);
    let test_cases = match resolve_within_root(&skill_dir, &tests_file) {
        Ok(path) => load_valid_cases(&path),
        Err(e) => {
            tracing::warn!(skill = %name, "golden test file: {}; no cases loaded", e);
            Vec::new()
        }
    };

    let extensions: BTreeMap<String, Value> = meta
        .fields
        .iter()
        .filter(|(k, _)| !RECOGNIZED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(Manifest {
        version: version_string(&meta),
        authors: meta
            .get("authors")
            .and_then(string_list)
            .unwrap_or_default(),
        declared_tools: declared_tools(&meta),
        entrypoints: meta
            .get("entrypoints")
            .and_then(string_list)
            .unwrap_or_default(),
        input_schema: schema_or_empty(&meta, "inputs"),
        output_schema: schema_or_empty(&meta, "outputs"),
        policy,
        tests_file,
        test_cases,
        body: meta.body,
        extensions,
        skill_dir,
        name,
        description,
    })
}
