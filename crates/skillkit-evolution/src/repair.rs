//! Bounded generate → verify → repair loop.
//!
//! ```text
//! Generate ──▶ Verify ──▶ ok? ──yes──▶ Success
//!                ▲          │ no
//!                │          ▼
//!                │     budget spent? ──yes──▶ Exhausted
//!                │          │ no
//!                └── Repair ◀┘
//! ```
//!
//! Provider and apply errors never abort the loop; they become part of the
//! next repair report.

use std::path::Path;

use serde::Serialize;

use skillkit_core::config::RuntimeConfig;
use skillkit_core::observability;
use skillkit_core::skill::{self, LintIssue, LintResult, TestFailure, TestResult};
use skillkit_fs::{AppliedPatch, WriteAllowlist};
use skillkit_sandbox::{run_tests_with, ExecutionOptions};

use crate::provider::{GenerationRequest, SkillProvider};
use crate::report::RepairReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairMode {
    /// Ask the provider for a brand new skill first
    Create,
    /// Start from the skill already on disk
    Refine,
}

/// One verify pass and the change applied after it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairIteration {
    pub lint: LintResult,
    pub tests: TestResult,
    /// Files touched by the change applied before this verify
    pub applied: Option<Vec<String>>,
    /// Why the change before this verify could not be obtained or applied
    pub apply_error: Option<String>,
}

impl RepairIteration {
    pub fn is_ok(&self) -> bool {
        self.lint.ok && self.tests.ok
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status")]
pub enum RepairOutcome {
    Success {
        /// Repair calls made after the initial generation
        iterations: u32,
        last: RepairIteration,
    },
    Exhausted {
        iterations: u32,
        last: RepairIteration,
        last_lint_error: Option<LintIssue>,
        first_test_failure: Option<TestFailure>,
    },
}

impl RepairOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn iterations(&self) -> u32 {
        match self {
            Self::Success { iterations, .. } | Self::Exhausted { iterations, .. } => *iterations,
        }
    }

    pub fn last(&self) -> &RepairIteration {
        match self {
            Self::Success { last, .. } | Self::Exhausted { last, .. } => last,
        }
    }

    /// One-paragraph, human-readable status.
    pub fn summary(&self) -> String {
        match self {
            Self::Success { iterations, .. } => {
                format!("skill verified after {} repair iteration(s)", iterations)
            }
            Self::Exhausted {
                iterations,
                last,
                last_lint_error,
                first_test_failure,
            } => {
                let mut parts = vec![format!(
                    "skill still failing after {} repair iteration(s)",
                    iterations
                )];
                if let Some(issue) = last_lint_error {
                    parts.push(format!("last lint error: {}", issue));
                }
                if let Some(failure) = first_test_failure {
                    parts.push(format!("first test failure: {}", failure));
                }
                if let Some(e) = &last.apply_error {
                    parts.push(format!("last change not applied: {}", e));
                }
                parts.join("; ")
            }
        }
    }
}

pub struct RepairOrchestrator<P> {
    provider: P,
    max_iterations: u32,
    allowlist: WriteAllowlist,
    execution: ExecutionOptions,
}

impl<P: SkillProvider> RepairOrchestrator<P> {
    pub fn new(provider: P) -> Self {
        Self::from_config(provider, &RuntimeConfig::default())
    }

    pub fn from_config(provider: P, config: &RuntimeConfig) -> Self {
        Self {
            provider,
            max_iterations: config.max_repair_iterations,
            allowlist: WriteAllowlist::default(),
            execution: ExecutionOptions::from_config(config),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_allowlist(mut self, allowlist: WriteAllowlist) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn with_execution_options(mut self, options: ExecutionOptions) -> Self {
        self.execution = options;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Drive the loop for `request.skill_dir` until it verifies or the budget runs out.
    pub async fn run(&self, mode: RepairMode, request: &GenerationRequest) -> RepairOutcome {
        let root = request.skill_dir.as_path();
        tracing::info!(
            skill_dir = %root.display(),
            ?mode,
            max_iterations = self.max_iterations,
            "repair loop started"
        );

        // Refine spends its first repair before the loop, so both modes share one budget
        let (mut applied, mut apply_error, mut repairs) = match mode {
            RepairMode::Create => {
                let answer = self.provider.generate(request).await;
                let (applied, apply_error) = self.apply(root, answer);
                (applied, apply_error, 0)
            }
            RepairMode::Refine => {
                let current = self.verify(root, None, None).await;
                if current.is_ok() {
                    tracing::info!(skill_dir = %root.display(), "skill already verifies; nothing to refine");
                    return RepairOutcome::Success {
                        iterations: 0,
                        last: current,
                    };
                }
                if self.max_iterations == 0 {
                    return self.exhausted(root, 0, current);
                }
                let report =
                    RepairReport::build(root, 0, &current.lint, &current.tests, None);
                let answer = self.provider.repair(request, &report).await;
                let (applied, apply_error) = self.apply(root, answer);
                (applied, apply_error, 1)
            }
        };

        loop {
            let pass = self.verify(root, applied.take(), apply_error.take()).await;
            observability::audit_repair_iteration(
                &root.display().to_string(),
                repairs,
                pass.lint.error_count(),
                pass.tests.failed,
            );

            if pass.is_ok() {
                tracing::info!(skill_dir = %root.display(), repairs, "repair loop succeeded");
                return RepairOutcome::Success {
                    iterations: repairs,
                    last: pass,
                };
            }
            if repairs >= self.max_iterations {
                return self.exhausted(root, repairs, pass);
            }

            let report = RepairReport::build(
                root,
                repairs,
                &pass.lint,
                &pass.tests,
                pass.apply_error.clone(),
            );
            tracing::debug!(
                skill_dir = %root.display(),
                repairs,
                lint_errors = report.lint_errors.len(),
                test_failures = report.test_failures.len(),
                "requesting repair"
            );
            let answer = self.provider.repair(request, &report).await;
            (applied, apply_error) = self.apply(root, answer);
            repairs += 1;
        }
    }

    fn exhausted(&self, root: &Path, repairs: u32, pass: RepairIteration) -> RepairOutcome {
        tracing::warn!(
            skill_dir = %root.display(),
            repairs,
            lint_errors = pass.lint.error_count(),
            test_failures = pass.tests.failed,
            "repair budget exhausted"
        );
        RepairOutcome::Exhausted {
            iterations: repairs,
            last_lint_error: pass.lint.first_error().cloned(),
            first_test_failure: pass.tests.first_failure().cloned(),
            last: pass,
        }
    }

    fn apply(
        &self,
        root: &Path,
        answer: anyhow::Result<crate::provider::ProviderOutput>,
    ) -> (Option<Vec<String>>, Option<String>) {
        let output = match answer {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(skill_dir = %root.display(), "provider failed: {:#}", e);
                return (None, Some(format!("provider error: {:#}", e)));
            }
        };
        match output.apply(root, &self.allowlist) {
            Ok(AppliedPatch { written, removed }) => {
                let mut files = written;
                files.extend(removed);
                (Some(files), None)
            }
            Err(e) => {
                tracing::warn!(skill_dir = %root.display(), kind = output.kind(), "patch rejected: {}", e);
                (None, Some(e.to_string()))
            }
        }
    }

    /// Lint and golden tests, exactly as a manual invocation runs them.
    async fn verify(
        &self,
        root: &Path,
        applied: Option<Vec<String>>,
        apply_error: Option<String>,
    ) -> RepairIteration {
        let lint = skill::lint(root);
        let tests = match skill::parse(root) {
            Ok(manifest) => run_tests_with(&manifest, &self.execution).await,
            Err(e) => TestResult::aborted(format!("manifest could not be loaded: {}", e)),
        };
        RepairIteration {
            lint,
            tests,
            applied,
            apply_error,
        }
    }
}
