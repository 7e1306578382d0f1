//! Environment variable keys and their aliases.
//!
//! Primary keys use the `SKILLKIT_*` prefix; `OPENAI_*` names are accepted as
//! aliases for the LLM provider settings.

/// LLM provider used by the repair loop
pub mod llm {
    pub const API_BASE: &str = "SKILLKIT_API_BASE";
    pub const API_BASE_ALIASES: &[&str] = &["OPENAI_API_BASE", "OPENAI_BASE_URL", "BASE_URL"];

    pub const API_KEY: &str = "SKILLKIT_API_KEY";
    pub const API_KEY_ALIASES: &[&str] = &["OPENAI_API_KEY", "API_KEY"];

    pub const MODEL: &str = "SKILLKIT_MODEL";
    pub const MODEL_ALIASES: &[&str] = &["OPENAI_MODEL", "MODEL"];
}

/// Workspace and skill locations
pub mod paths {
    pub const SKILLKIT_WORKSPACE: &str = "SKILLKIT_WORKSPACE";

    pub const SKILLKIT_SKILLS_ROOT: &str = "SKILLKIT_SKILLS_ROOT";
    pub const SKILLS_ROOT_ALIASES: &[&str] = &["SKILLS_DIR"];
}

/// Execution and repair loop limits
pub mod runtime {
    pub const SKILLKIT_TIMEOUT_MS: &str = "SKILLKIT_TIMEOUT_MS";
    pub const SKILLKIT_MAX_REPAIR_ITERATIONS: &str = "SKILLKIT_MAX_REPAIR_ITERATIONS";
    pub const SKILLKIT_RELOAD_DEBOUNCE_MS: &str = "SKILLKIT_RELOAD_DEBOUNCE_MS";
}

/// Logging and audit
pub mod observability {
    pub const SKILLKIT_QUIET: &str = "SKILLKIT_QUIET";
    pub const SKILLKIT_LOG_LEVEL: &str = "SKILLKIT_LOG_LEVEL";
    pub const SKILLKIT_LOG_JSON: &str = "SKILLKIT_LOG_JSON";
    pub const SKILLKIT_AUDIT_LOG: &str = "SKILLKIT_AUDIT_LOG";
}
