pub mod golden;
pub mod lint;
pub mod manifest;
pub mod metadata;
pub mod policy;

pub use golden::{Assertion, AssertionKind, GoldenTestCase, TestFailure, TestResult};
pub use lint::{lint, LintIssue, LintResult, Severity};
pub use manifest::Manifest;
pub use metadata::{parse, ParseError};
pub use policy::{check_compliance, Policy, PolicyViolation, ViolationCode};
