//! Unified configuration layer.
//!
//! Every environment read goes through this module; runtime code works with
//! the structured configs below instead of calling `std::env::var` directly.
//!
//! - `loader`: env_or, env_optional, env_bool, env_u64, .env loading
//! - `schema`: LlmConfig, PathsConfig, RuntimeConfig, ObservabilityConfig
//! - `env_keys`: key constants and aliases

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, env_u64, load_dotenv};
pub use schema::{
    LlmConfig, ObservabilityConfig, PathsConfig, RuntimeConfig, DEFAULT_MAX_REPAIR_ITERATIONS,
    DEFAULT_RELOAD_DEBOUNCE_MS, DEFAULT_TIMEOUT_MS,
};
