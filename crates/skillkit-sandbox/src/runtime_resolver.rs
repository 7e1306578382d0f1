//! RuntimeResolver trait: maps an entrypoint to the program that launches it.
//!
//! Implement this trait to support other interpreters (Deno, Lua, a pinned
//! Python). The runner asks the resolver before every spawn.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use skillkit_core::skill::metadata::ScriptLanguage;

/// How to launch one entrypoint: `program args... ` plus extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRuntime {
    /// Interpreter or the entrypoint itself when it runs directly
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Extra environment variables (e.g. PYTHONUNBUFFERED)
    pub extra_env: Vec<(String, String)>,
}

pub trait RuntimeResolver: Send + Sync {
    /// Resolve the launch command for an absolute entrypoint path.
    fn resolve(&self, entrypoint: &Path) -> ResolvedRuntime;
}

/// Interpreters looked up on `PATH`: `.py` with python3, `.js/.mjs/.cjs`
/// with node, `.sh` with bash. Anything else is executed directly.
#[derive(Debug, Clone)]
pub struct SystemRuntimes {
    pub python: PathBuf,
    pub node: PathBuf,
    pub bash: PathBuf,
}

impl Default for SystemRuntimes {
    fn default() -> Self {
        Self {
            python: PathBuf::from("python3"),
            node: PathBuf::from("node"),
            bash: PathBuf::from("bash"),
        }
    }
}

impl RuntimeResolver for SystemRuntimes {
    fn resolve(&self, entrypoint: &Path) -> ResolvedRuntime {
        let interpreted = |program: &PathBuf, extra_env: Vec<(String, String)>| ResolvedRuntime {
            program: program.clone(),
            args: vec![entrypoint.as_os_str().to_os_string()],
            extra_env,
        };
        let language = ScriptLanguage::from_path(entrypoint);
        tracing::debug!(
            entrypoint = %entrypoint.display(),
            runtime = language.map_or("direct", |l| l.as_str()),
            "resolved runtime"
        );
        match language {
            Some(ScriptLanguage::Python) => interpreted(
                &self.python,
                vec![("PYTHONUNBUFFERED".to_string(), "1".to_string())],
            ),
            Some(ScriptLanguage::Node) => interpreted(&self.node, Vec::new()),
            Some(ScriptLanguage::Bash) => interpreted(&self.bash, Vec::new()),
            None => ResolvedRuntime {
                program: entrypoint.to_path_buf(),
                args: Vec::new(),
                extra_env: Vec::new(),
            },
        }
    }
}
