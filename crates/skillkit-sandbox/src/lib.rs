//! Skill execution: subprocess runner with timeout and the golden test harness.

pub mod common;
pub mod golden;
pub mod log;
pub mod runner;
pub mod runtime_resolver;

pub use golden::{run_tests, run_tests_with};
pub use runner::{execute, ExecutionFailure, ExecutionOptions, ExecutionResult, FailureReason};
