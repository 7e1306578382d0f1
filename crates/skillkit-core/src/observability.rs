//! Observability: tracing init and the JSONL audit log.
//!
//! Uses `config::ObservabilityConfig` for SKILLKIT_QUIET, SKILLKIT_LOG_LEVEL,
//! SKILLKIT_LOG_JSON and SKILLKIT_AUDIT_LOG.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

static AUDIT_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Initialize tracing. Call once at process startup.
/// With SKILLKIT_QUIET=1 only WARN and above are logged.
pub fn init_tracing() {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let level = if cfg.quiet {
        "skillkit=warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

fn get_audit_path() -> Option<String> {
    {
        let guard = AUDIT_PATH.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = crate::config::ObservabilityConfig::from_env()
        .audit_log
        .clone()?;
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = AUDIT_PATH.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn audit(event: &str, fields: serde_json::Value) {
    let Some(path) = get_audit_path() else {
        return;
    };
    let mut record = json!({
        "ts": Utc::now().to_rfc3339(),
        "event": event,
    });
    if let (Some(obj), Some(extra)) = (record.as_object_mut(), fields.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    append_jsonl(&path, &record);
}

/// Audit: entrypoint about to be spawned
pub fn audit_execution_started(skill: &str, entrypoint: &str, cwd: &str) {
    audit(
        "execution_started",
        json!({ "skill": skill, "entrypoint": entrypoint, "cwd": cwd }),
    );
}

/// Audit: invocation finished (successfully or with a tagged failure)
pub fn audit_execution_completed(skill: &str, outcome: &str, duration_ms: u64, stdout_len: usize) {
    audit(
        "execution_completed",
        json!({
            "skill": skill,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "stdout_len": stdout_len,
        }),
    );
}

/// Audit: patch applied to a skill tree
pub fn audit_patch_applied(skill_dir: &str, kind: &str, files: &[String]) {
    audit(
        "patch_applied",
        json!({ "skill_dir": skill_dir, "kind": kind, "files": files }),
    );
}

/// Audit: one repair loop pass finished verifying
pub fn audit_repair_iteration(
    skill_dir: &str,
    iteration: u32,
    lint_errors: usize,
    test_failures: usize,
) {
    audit(
        "repair_iteration",
        json!({
            "skill_dir": skill_dir,
            "iteration": iteration,
            "lint_errors": lint_errors,
            "test_failures": test_failures,
        }),
    );
}
