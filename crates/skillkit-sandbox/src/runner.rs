//! Execution engine: runs a skill's first entrypoint as a subprocess under
//! the JSON-in/JSON-out contract.
//!
//! The pre-flight checks (declared policy paths, entrypoint containment) are
//! advisory. Nothing here intercepts what the child does once it runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use skillkit_core::config::RuntimeConfig;
use skillkit_core::observability;
use skillkit_core::path_validation::resolve_existing_within_root;
use skillkit_core::skill::{check_compliance, Manifest};
use tokio::process::Command;

use crate::common::{wait_with_timeout, WaitError, DEFAULT_TIMEOUT_MS, ENV_SKILL_DIR, ENV_SKILL_NAME};
use crate::info_log;
use crate::runtime_resolver::{RuntimeResolver, SystemRuntimes};

/// Per-invocation settings. The input payload is passed to [`execute`] separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Child working directory; the skill directory when `None`
    pub working_directory: Option<PathBuf>,
    pub timeout_ms: u64,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            working_directory: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl ExecutionOptions {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            working_directory: None,
            timeout_ms: config.timeout_ms,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    Timeout,
    NonZeroExit,
    InvalidOutputJson,
    ProcessError,
    PathTraversal,
    PolicyViolation,
    NoEntrypoint,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "Timeout",
            Self::NonZeroExit => "NonZeroExit",
            Self::InvalidOutputJson => "InvalidOutputJson",
            Self::ProcessError => "ProcessError",
            Self::PathTraversal => "PathTraversal",
            Self::PolicyViolation => "PolicyViolation",
            Self::NoEntrypoint => "NoEntrypoint",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub reason: FailureReason,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub message: String,
}

impl ExecutionFailure {
    fn preflight(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

/// Outcome of one invocation. Never an `Err`: every failure is tagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionResult {
    Success { output: Value },
    Failure(ExecutionFailure),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::Success { output } => Some(output),
            Self::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ExecutionFailure> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(f) => Some(f),
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure(f) => f.reason.as_str(),
        }
    }
}

/// Run `manifest`'s first entrypoint with `input` on stdin using the default
/// interpreters.
pub async fn execute(manifest: &Manifest, input: &Value, options: &ExecutionOptions) -> ExecutionResult {
    execute_with(&SystemRuntimes::default(), manifest, input, options).await
}

/// [`execute`] with an explicit interpreter resolver.
pub async fn execute_with(
    resolver: &dyn RuntimeResolver,
    manifest: &Manifest,
    input: &Value,
    options: &ExecutionOptions,
) -> ExecutionResult {
    let start = Instant::now();
    let result = run_entrypoint(resolver, manifest, input, options).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match &result {
        ExecutionResult::Success { .. } => {
            info_log!("[{}] finished in {} ms", manifest.name, duration_ms);
        }
        ExecutionResult::Failure(f) => {
            tracing::warn!(skill = %manifest.name, reason = %f.reason, "execution failed: {}", f.message);
        }
    }
    let stdout_len = match &result {
        ExecutionResult::Success { output } => output.to_string().len(),
        ExecutionResult::Failure(f) => f.stdout.len(),
    };
    observability::audit_execution_completed(
        &manifest.name,
        result.outcome_label(),
        duration_ms,
        stdout_len,
    );
    result
}

async fn run_entrypoint(
    resolver: &dyn RuntimeResolver,
    manifest: &Manifest,
    input: &Value,
    options: &ExecutionOptions,
) -> ExecutionResult {
    let skill_dir = manifest.skill_dir();

    let violations = check_compliance(&manifest.policy, skill_dir);
    if !violations.is_empty() {
        let message = violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return ExecutionResult::Failure(ExecutionFailure::preflight(
            FailureReason::PolicyViolation,
            message,
        ));
    }

    let Some(entry) = manifest.first_entrypoint() else {
        return ExecutionResult::Failure(ExecutionFailure::preflight(
            FailureReason::NoEntrypoint,
            format!("skill '{}' declares no entrypoints", manifest.name),
        ));
    };
    let entry_path = match resolve_existing_within_root(skill_dir, entry) {
        Ok(p) => p,
        Err(e) => {
            return ExecutionResult::Failure(ExecutionFailure::preflight(
                FailureReason::PathTraversal,
                e.to_string(),
            ))
        }
    };

    let payload = match serde_json::to_vec(input) {
        Ok(p) => p,
        Err(e) => {
            return ExecutionResult::Failure(ExecutionFailure::preflight(
                FailureReason::ProcessError,
                format!("failed to serialize input: {}", e),
            ))
        }
    };

    let cwd = options
        .working_directory
        .clone()
        .unwrap_or_else(|| skill_dir.to_path_buf());
    let runtime = resolver.resolve(&entry_path);

    info_log!("[{}] running {} via {}", manifest.name, entry, runtime.program.display());
    observability::audit_execution_started(&manifest.name, entry, &cwd.display().to_string());

    let mut cmd = Command::new(&runtime.program);
    cmd.args(&runtime.args)
        .current_dir(&cwd)
        .env(ENV_SKILL_NAME, &manifest.name)
        .env(ENV_SKILL_DIR, skill_dir)
        .envs(runtime.extra_env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecutionResult::Failure(ExecutionFailure::preflight(
                FailureReason::ProcessError,
                format!("failed to launch {}: {}", runtime.program.display(), e),
            ))
        }
    };

    let output = match wait_with_timeout(&mut child, payload, options.timeout_ms).await {
        Ok(output) => output,
        Err(e @ WaitError::TimedOut(_)) => {
            return ExecutionResult::Failure(ExecutionFailure {
                reason: FailureReason::Timeout,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                message: e.to_string(),
            })
        }
        Err(e @ WaitError::Wait(_)) => {
            return ExecutionResult::Failure(ExecutionFailure::preflight(
                FailureReason::ProcessError,
                e.to_string(),
            ))
        }
    };

    if !output.status.success() {
        let exit_code = output.status.code();
        let message = match exit_code {
            Some(code) => format!("process exited with code {}", code),
            None => "process terminated by signal".to_string(),
        };
        return ExecutionResult::Failure(ExecutionFailure {
            reason: FailureReason::NonZeroExit,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
            message,
        });
    }

    let trimmed = output.stdout.trim();
    if trimmed.is_empty() {
        return ExecutionResult::Success { output: Value::Null };
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => ExecutionResult::Success { output: value },
        Err(e) => ExecutionResult::Failure(ExecutionFailure {
            reason: FailureReason::InvalidOutputJson,
            message: format!("stdout is not a single JSON document: {}", e),
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: Some(0),
        }),
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Skill whose entrypoint `scripts/run.sh` has the given body.
    pub(crate) fn shell_skill(body: &str) -> TempDir {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), body);
        tmp
    }

    pub(crate) fn write_skill(dir: &Path, body: &str) {
        fs::create_dir_all(dir.join("scripts")).unwrap();
        fs::write(dir.join("scripts/run.sh"), body).unwrap();
        fs::write(
            dir.join("SKILL.md"),
            "---\nname: echo\ndescription: test skill\nentrypoints: [scripts/run.sh]\n---\n",
        )
        .unwrap();
    }

    fn manifest(dir: &Path) -> Manifest {
        skillkit_core::skill::parse(dir).unwrap()
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let tmp = shell_skill("cat\n");
        let m = manifest(tmp.path());
        let result = execute(&m, &json!({"msg": "hi"}), &ExecutionOptions::default()).await;
        assert_eq!(result, ExecutionResult::Success { output: json!({"msg": "hi"}) });
    }

    #[tokio::test]
    async fn test_child_sees_skill_env() {
        let tmp = shell_skill("printf '{\"name\":\"%s\"}' \"$SKILLKIT_SKILL_NAME\"\n");
        let m = manifest(tmp.path());
        let result = execute(&m, &json!({}), &ExecutionOptions::default()).await;
        assert_eq!(result.output(), Some(&json!({"name": "echo"})));
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_streams() {
        let tmp = shell_skill("echo boom >&2\nexit 1\n");
        let m = manifest(tmp.path());
        let result = execute(&m, &json!({}), &ExecutionOptions::default()).await;
        let failure = result.failure().unwrap();
        assert_eq!(failure.reason, FailureReason::NonZeroExit);
        assert_eq!(failure.exit_code, Some(1));
        assert!(failure.stderr.contains("boom"));
    }

    #[tokio::test]
    async fn test_silent_entrypoint_times_out_quickly() {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // The pid lands on disk long before the deadline; the process then stays silent
        let tmp = shell_skill("echo $$ > \"$SKILLKIT_SKILL_DIR/pid\"\nexec sleep 5\n");
        let m = manifest(tmp.path());
        let start = Instant::now();
        let result = execute(&m, &json!({}), &ExecutionOptions::default().with_timeout_ms(400)).await;
        assert!(start.elapsed() < Duration::from_millis(2000));
        let failure = result.failure().unwrap();
        assert_eq!(failure.reason, FailureReason::Timeout);
        assert!(failure.stdout.is_empty());

        let pid = fs::read_to_string(tmp.path().join("pid")).unwrap();
        let pid: i32 = pid.trim().parse().unwrap();
        assert!(kill(Pid::from_raw(pid), None).is_err());
    }

    #[tokio::test]
    async fn test_invalid_json_and_empty_output() {
        let tmp = shell_skill("echo not json\n");
        let m = manifest(tmp.path());
        let result = execute(&m, &json!({}), &ExecutionOptions::default()).await;
        let failure = result.failure().unwrap();
        assert_eq!(failure.reason, FailureReason::InvalidOutputJson);
        assert_eq!(failure.stdout.trim(), "not json");

        let tmp = shell_skill("cat > /dev/null\n");
        let m = manifest(tmp.path());
        let result = execute(&m, &json!({"x": 1}), &ExecutionOptions::default()).await;
        assert_eq!(result, ExecutionResult::Success { output: Value::Null });
    }

    #[tokio::test]
    async fn test_preflight_failures() {
        let tmp = shell_skill("cat\n");
        let mut m = manifest(tmp.path());

        m.policy.writable_paths = vec!["../elsewhere".to_string()];
        let result = execute(&m, &json!({}), &ExecutionOptions::default()).await;
        assert_eq!(result.failure().unwrap().reason, FailureReason::PolicyViolation);

        m.policy.writable_paths.clear();
        m.entrypoints = vec!["../../bin/sh".to_string()];
        let result = execute(&m, &json!({}), &ExecutionOptions::default()).await;
        assert_eq!(result.failure().unwrap().reason, FailureReason::PathTraversal);

        m.entrypoints.clear();
        let result = execute(&m, &json!({}), &ExecutionOptions::default()).await;
        assert_eq!(result.failure().unwrap().reason, FailureReason::NoEntrypoint);
    }

    #[tokio::test]
    async fn test_missing_entrypoint_is_process_error() {
        let tmp = shell_skill("cat\n");
        let mut m = manifest(tmp.path());
        m.entrypoints = vec!["scripts/missing".to_string()];
        let result = execute(&m, &json!({}), &ExecutionOptions::default()).await;
        assert_eq!(result.failure().unwrap().reason, FailureReason::ProcessError);
    }

    #[tokio::test]
    async fn test_working_directory_override() {
        let tmp = shell_skill("printf '\"%s\"' \"$(pwd)\"\n");
        let cwd = TempDir::new().unwrap();
        let m = manifest(tmp.path());
        let options = ExecutionOptions::default().with_working_directory(cwd.path());
        let result = execute(&m, &json!({}), &options).await;
        let reported = PathBuf::from(result.output().unwrap().as_str().unwrap());
        assert_eq!(
            reported.canonicalize().unwrap(),
            cwd.path().canonicalize().unwrap()
        );
    }
}
