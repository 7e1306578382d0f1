//! SkillKit Evolution: create and refine skills through a bounded repair loop.
//!
//! The loop talks to code generation only through [`SkillProvider`]; the
//! [`llm`] module supplies an implementation over any OpenAI-compatible
//! chat completion endpoint.

pub mod llm;
pub mod provider;
pub mod repair;
pub mod report;

pub use llm::{CompletionLlm, LlmMessage, LlmSkillProvider, OpenAiCompatLlm};
pub use provider::{GenerationRequest, ProviderOutput, SkillProvider};
pub use repair::{RepairIteration, RepairMode, RepairOrchestrator, RepairOutcome};
pub use report::{FileSnapshot, RepairReport};
