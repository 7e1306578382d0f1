//! Core of the skill runtime: configuration, observability, path validation,
//! and the skill manifest model with its parser, linter and policy checks.

pub mod config;
pub mod observability;
pub mod path_validation;
pub mod skill;

pub use skill::{lint, parse, LintResult, Manifest, ParseError, Policy};
