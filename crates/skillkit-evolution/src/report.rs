//! Error report handed to the provider on each repair request.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use skillkit_core::skill::{LintIssue, LintResult, TestFailure, TestResult};

/// Files larger than this are left out of the snapshot.
pub const MAX_SNAPSHOT_FILE_BYTES: usize = 64 * 1024;

/// Total snapshot budget across all files.
pub const MAX_SNAPSHOT_TOTAL_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// Relative to the skill root, `/`-separated
    pub path: String,
    pub content: String,
}

/// Everything the provider needs to produce the next fix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    /// Repairs already attempted before this one
    pub iteration: u32,
    pub lint_errors: Vec<LintIssue>,
    pub test_failures: Vec<TestFailure>,
    /// Why the previous provider answer could not be obtained or applied
    pub apply_error: Option<String>,
    pub files: Vec<FileSnapshot>,
    /// Files skipped because of the size caps
    pub omitted_files: Vec<String>,
}

impl RepairReport {
    pub fn build(
        skill_root: &Path,
        iteration: u32,
        lint: &LintResult,
        tests: &TestResult,
        apply_error: Option<String>,
    ) -> Self {
        let (files, omitted_files) = snapshot_tree(skill_root);
        Self {
            iteration,
            lint_errors: lint.errors().cloned().collect(),
            test_failures: tests.failures.clone(),
            apply_error,
            files,
            omitted_files,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.lint_errors.is_empty() && self.test_failures.is_empty() && self.apply_error.is_none()
    }

    /// The problem list as prompt text.
    pub fn render_problems(&self) -> String {
        let mut out = String::new();
        if let Some(e) = &self.apply_error {
            let _ = writeln!(out, "Previous change could not be applied: {}", e);
        }
        if !self.lint_errors.is_empty() {
            let _ = writeln!(out, "Lint errors:");
            for issue in &self.lint_errors {
                let _ = writeln!(out, "- {}", issue);
            }
        }
        if !self.test_failures.is_empty() {
            let _ = writeln!(out, "Test failures:");
            for failure in &self.test_failures {
                let _ = writeln!(out, "- {}", failure);
            }
        }
        if out.is_empty() {
            out.push_str("No lint errors or test failures were reported.\n");
        }
        out
    }

    /// The file tree as prompt text, one fenced block per file.
    pub fn render_files(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            let _ = writeln!(out, "### {}\n```\n{}\n```", file.path, file.content.trim_end());
        }
        if !self.omitted_files.is_empty() {
            let _ = writeln!(out, "(omitted, too large: {})", self.omitted_files.join(", "));
        }
        out
    }
}

/// Text files under `skill_root`, sorted by path. Hidden entries are skipped.
pub fn snapshot_tree(skill_root: &Path) -> (Vec<FileSnapshot>, Vec<String>) {
    let mut paths = Vec::new();
    collect_files(skill_root, skill_root, &mut paths);
    paths.sort();

    let mut files = Vec::new();
    let mut omitted = Vec::new();
    let mut total = 0usize;
    for rel in paths {
        let abs = skill_root.join(&rel);
        let bytes = match std::fs::read(&abs) {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(path = %abs.display(), "snapshot skipped unreadable file: {}", e);
                continue;
            }
        };
        if bytes.contains(&0) {
            continue;
        }
        let Ok(content) = String::from_utf8(bytes) else {
            continue;
        };
        if content.len() > MAX_SNAPSHOT_FILE_BYTES || total + content.len() > MAX_SNAPSHOT_TOTAL_BYTES
        {
            omitted.push(rel);
            continue;
        }
        total += content.len();
        files.push(FileSnapshot { path: rel, content });
    }
    (files, omitted)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            collect_files(root, &path, out);
        } else if file_type.is_file() {
            if let Ok(rel) = path.strip_prefix(root) {
                let rel: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(rel.join("/"));
            }
        }
    }
}
