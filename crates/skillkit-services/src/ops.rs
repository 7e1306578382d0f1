//! Entry-neutral skill operations. A CLI, a desktop app or a protocol server
//! call these and only format the results.

use std::path::Path;

use serde_json::Value;

use skillkit_core::skill::manifest::MANIFEST_FILE_NAME;
use skillkit_core::skill::{self, LintResult, Manifest, TestResult};
use skillkit_evolution::{GenerationRequest, RepairMode, RepairOrchestrator, RepairOutcome, SkillProvider};
use skillkit_sandbox::{execute, run_tests_with, ExecutionOptions, ExecutionResult};

use crate::error::ServiceError;
use crate::schema::InputValidator;

pub fn lint(skill_dir: &Path) -> LintResult {
    skill::lint(skill_dir)
}

pub fn load(skill_dir: &Path) -> Result<Manifest, ServiceError> {
    skill::parse(skill_dir).map_err(|e| ServiceError::load(skill_dir, e))
}

pub async fn test(skill_dir: &Path, options: &ExecutionOptions) -> Result<TestResult, ServiceError> {
    let manifest = load(skill_dir)?;
    Ok(run_tests_with(&manifest, options).await)
}

/// Validate `input` against the declared inputs, then execute once.
pub async fn run(
    skill_dir: &Path,
    input: &Value,
    options: &ExecutionOptions,
) -> Result<ExecutionResult, ServiceError> {
    let manifest = load(skill_dir)?;
    let validator = input_validator(&manifest)?;
    run_manifest(&manifest, &validator, input, options).await
}

pub(crate) fn input_validator(manifest: &Manifest) -> Result<InputValidator, ServiceError> {
    InputValidator::compile(&manifest.input_schema).map_err(|message| ServiceError::InvalidSchema {
        skill: manifest.name.clone(),
        message,
    })
}

pub(crate) async fn run_manifest(
    manifest: &Manifest,
    validator: &InputValidator,
    input: &Value,
    options: &ExecutionOptions,
) -> Result<ExecutionResult, ServiceError> {
    validator.validate(input).map_err(|message| ServiceError::InvalidInput {
        skill: manifest.name.clone(),
        message,
    })?;
    Ok(execute(manifest, input, options).await)
}

/// Generate a new skill in `skill_dir` and repair it until it verifies.
pub async fn create<P: SkillProvider>(
    orchestrator: &RepairOrchestrator<P>,
    skill_dir: &Path,
    description: &str,
) -> Result<RepairOutcome, ServiceError> {
    if skill_dir.join(MANIFEST_FILE_NAME).exists() {
        return Err(ServiceError::AlreadyExists(skill_dir.to_path_buf()));
    }
    std::fs::create_dir_all(skill_dir).map_err(|source| ServiceError::Io {
        path: skill_dir.to_path_buf(),
        source,
    })?;
    let request = GenerationRequest::new(skill_dir, description);
    Ok(orchestrator.run(RepairMode::Create, &request).await)
}

/// Repair an existing skill, optionally steering the change with `instruction`.
pub async fn refine<P: SkillProvider>(
    orchestrator: &RepairOrchestrator<P>,
    skill_dir: &Path,
    instruction: &str,
) -> RepairOutcome {
    let request = GenerationRequest::new(skill_dir, instruction);
    orchestrator.run(RepairMode::Refine, &request).await
}
