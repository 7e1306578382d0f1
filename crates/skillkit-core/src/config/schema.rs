//! Config structs grouped by concern, all loaded from the environment.

use super::env_keys::{llm, observability as obv_keys, paths, runtime};
use super::loader::{env_bool, env_optional, env_or, env_u64, load_dotenv};
use std::path::PathBuf;

/// Default wall-clock budget for one skill invocation.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default number of repair calls before the loop gives up.
pub const DEFAULT_MAX_REPAIR_ITERATIONS: u64 = 5;

/// Default debounce window for manifest reloads.
pub const DEFAULT_RELOAD_DEBOUNCE_MS: u64 = 500;

/// LLM API config for the code-generation provider
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        let api_base = env_or(llm::API_BASE, llm::API_BASE_ALIASES, || {
            "https://api.openai.com/v1".to_string()
        });
        let model = env_or(llm::MODEL, llm::MODEL_ALIASES, || {
            Self::default_model_for_base(&api_base).to_string()
        });
        Self {
            api_key: env_or(llm::API_KEY, llm::API_KEY_ALIASES, String::new),
            api_base,
            model,
        }
    }

    /// `None` when no API key or base is configured.
    pub fn try_from_env() -> Option<Self> {
        Some(Self::from_env()).filter(Self::is_configured)
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.api_base.trim().is_empty()
    }

    pub fn default_model_for_base(api_base: &str) -> &'static str {
        if api_base.contains("localhost:11434") || api_base.contains("127.0.0.1:11434") {
            "qwen2.5:7b"
        } else if api_base.contains("api.deepseek.com") {
            "deepseek-chat"
        } else {
            "gpt-4o"
        }
    }
}

/// Workspace and skill locations
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub workspace: PathBuf,
    /// Directory that holds one sub-directory per skill
    pub skills_root: Option<PathBuf>,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        let workspace = env_optional(paths::SKILLKIT_WORKSPACE, &[])
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let skills_root =
            env_optional(paths::SKILLKIT_SKILLS_ROOT, paths::SKILLS_ROOT_ALIASES).map(PathBuf::from);
        Self {
            workspace,
            skills_root,
        }
    }

    /// Skills root, or `<workspace>/skills` when unset.
    pub fn resolved_skills_root(&self) -> PathBuf {
        self.skills_root
            .clone()
            .unwrap_or_else(|| self.workspace.join("skills"))
    }
}

/// Execution and repair-loop limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub timeout_ms: u64,
    pub max_repair_iterations: u32,
    pub reload_debounce_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_repair_iterations: DEFAULT_MAX_REPAIR_ITERATIONS as u32,
            reload_debounce_ms: DEFAULT_RELOAD_DEBOUNCE_MS,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        let max_iterations = env_u64(
            runtime::SKILLKIT_MAX_REPAIR_ITERATIONS,
            &[],
            DEFAULT_MAX_REPAIR_ITERATIONS,
        );
        Self {
            timeout_ms: env_u64(runtime::SKILLKIT_TIMEOUT_MS, &[], DEFAULT_TIMEOUT_MS),
            max_repair_iterations: u32::try_from(max_iterations).unwrap_or(u32::MAX),
            reload_debounce_ms: env_u64(
                runtime::SKILLKIT_RELOAD_DEBOUNCE_MS,
                &[],
                DEFAULT_RELOAD_DEBOUNCE_MS,
            ),
        }
    }
}

/// Logging and audit: quiet, log_level, log_json, audit_log
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            load_dotenv();
            Self {
                quiet: env_bool(obv_keys::SKILLKIT_QUIET, &[], false),
                log_level: env_or(obv_keys::SKILLKIT_LOG_LEVEL, &[], || {
                    "skillkit=info".to_string()
                }),
                log_json: env_bool(obv_keys::SKILLKIT_LOG_JSON, &[], false),
                audit_log: env_optional(obv_keys::SKILLKIT_AUDIT_LOG, &[]),
            }
        })
    }
}
