//! Tool-adapter host: one tool per loaded skill, with coalesced hot reload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock as AsyncRwLock};

use skillkit_core::config::{PathsConfig, RuntimeConfig, DEFAULT_RELOAD_DEBOUNCE_MS};
use skillkit_core::skill::manifest::MANIFEST_FILE_NAME;
use skillkit_core::skill::{self, Manifest};
use skillkit_evolution::{RepairOrchestrator, RepairOutcome, SkillProvider};
use skillkit_sandbox::{ExecutionOptions, ExecutionResult};

use crate::error::ServiceError;
use crate::ops;
use crate::schema::InputValidator;

/// What a calling agent sees for each loaded skill.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStatus {
    Reloaded,
    /// A repair holds the directory; the reload runs when it finishes
    Deferred,
}

/// A parsed manifest and the validator compiled from its `inputs`.
#[derive(Clone)]
struct Loaded {
    manifest: Arc<Manifest>,
    validator: Arc<InputValidator>,
}

impl Loaded {
    fn compile(manifest: Manifest) -> Result<Self, ServiceError> {
        let validator = ops::input_validator(&manifest)?;
        Ok(Self {
            manifest: Arc::new(manifest),
            validator: Arc::new(validator),
        })
    }
}

pub(crate) struct SkillEntry {
    pub(crate) dir: PathBuf,
    loaded: RwLock<Loaded>,
    /// Readers are invocations; the writer is a repair loop
    gate: Arc<AsyncRwLock<()>>,
    repairing: AtomicBool,
    reload_pending: AtomicBool,
}

impl SkillEntry {
    fn new(manifest: Manifest) -> Result<Self, ServiceError> {
        let dir = canonical(manifest.skill_dir());
        Ok(Self {
            dir,
            loaded: RwLock::new(Loaded::compile(manifest)?),
            gate: Arc::new(AsyncRwLock::new(())),
            repairing: AtomicBool::new(false),
            reload_pending: AtomicBool::new(false),
        })
    }

    fn loaded(&self) -> Loaded {
        match self.loaded.read() {
            Ok(l) => l.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn current(&self) -> Arc<Manifest> {
        self.loaded().manifest
    }

    /// Parse and compile from disk, then swap in; the old state stays on failure.
    fn reload(&self) -> Result<Arc<Manifest>, ServiceError> {
        let manifest = skill::parse(&self.dir).map_err(|e| ServiceError::load(&self.dir, e))?;
        let fresh = Loaded::compile(manifest)?;
        let mut slot = match self.loaded.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = fresh.clone();
        tracing::info!(skill = %fresh.manifest.name, version = %fresh.manifest.version, "skill reloaded");
        Ok(fresh.manifest)
    }

    fn request_reload(&self) -> Result<ReloadStatus, ServiceError> {
        self.reload_pending.store(true, Ordering::SeqCst);
        if self.repairing.load(Ordering::SeqCst) {
            tracing::debug!(dir = %self.dir.display(), "reload deferred until repair finishes");
            return Ok(ReloadStatus::Deferred);
        }
        // Whoever clears the flag performs the reload
        if self.reload_pending.swap(false, Ordering::SeqCst) {
            self.reload()?;
        }
        Ok(ReloadStatus::Reloaded)
    }
}

/// Exclusive hold on one skill directory. Invocations of that skill wait
/// until it drops; reloads requested meanwhile run once, on drop.
pub struct SkillDirGuard {
    entry: Arc<SkillEntry>,
    _write: OwnedRwLockWriteGuard<()>,
}

impl SkillDirGuard {
    pub fn skill_dir(&self) -> &Path {
        &self.entry.dir
    }
}

impl Drop for SkillDirGuard {
    fn drop(&mut self) {
        self.entry.repairing.store(false, Ordering::SeqCst);
        if self.entry.reload_pending.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.entry.reload() {
                tracing::warn!(dir = %self.entry.dir.display(), "deferred reload failed: {}", e);
            }
        }
    }
}

pub struct SkillHost {
    skills: RwLock<HashMap<String, Arc<SkillEntry>>>,
    options: ExecutionOptions,
    reload_debounce_ms: u64,
}

impl Default for SkillHost {
    fn default() -> Self {
        Self::new(ExecutionOptions::default())
    }
}

impl SkillHost {
    pub fn new(options: ExecutionOptions) -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
            options,
            reload_debounce_ms: DEFAULT_RELOAD_DEBOUNCE_MS,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(ExecutionOptions::from_config(config))
            .with_reload_debounce_ms(config.reload_debounce_ms)
    }

    pub fn with_reload_debounce_ms(mut self, reload_debounce_ms: u64) -> Self {
        self.reload_debounce_ms = reload_debounce_ms;
        self
    }

    /// Quiet period the watcher waits for before reloading.
    pub fn reload_debounce_ms(&self) -> u64 {
        self.reload_debounce_ms
    }

    fn read_skills(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<SkillEntry>>> {
        match self.skills.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn entry(&self, name: &str) -> Result<Arc<SkillEntry>, ServiceError> {
        self.read_skills()
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownSkill(name.to_string()))
    }

    pub(crate) fn entries(&self) -> Vec<Arc<SkillEntry>> {
        self.read_skills().values().cloned().collect()
    }

    /// Parse the skill at `skill_dir` and register it under its manifest name.
    /// A manifest whose `inputs` is not a valid JSON Schema does not load.
    pub fn load(&self, skill_dir: &Path) -> Result<String, ServiceError> {
        let manifest = ops::load(skill_dir)?;
        let name = manifest.name.clone();
        let entry = Arc::new(SkillEntry::new(manifest)?);
        let mut skills = match self.skills.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if skills.insert(name.clone(), entry).is_some() {
            tracing::info!(skill = %name, "replaced previously loaded skill");
        } else {
            tracing::info!(skill = %name, dir = %skill_dir.display(), "skill loaded");
        }
        Ok(name)
    }

    /// Load every direct subdirectory of `skills_root` that holds a manifest.
    /// Skills that fail to parse are logged and skipped.
    pub fn load_all(&self, skills_root: &Path) -> Result<Vec<String>, ServiceError> {
        let entries = std::fs::read_dir(skills_root).map_err(|source| ServiceError::Io {
            path: skills_root.to_path_buf(),
            source,
        })?;
        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.join(MANIFEST_FILE_NAME).is_file())
            .collect();
        dirs.sort();

        let mut loaded = Vec::new();
        for dir in dirs {
            match self.load(&dir) {
                Ok(name) => loaded.push(name),
                Err(e) => tracing::warn!(dir = %dir.display(), "skipping skill: {}", e),
            }
        }
        Ok(loaded)
    }

    /// Load the configured skills root (`SKILLKIT_SKILLS_ROOT`, else `<workspace>/skills`).
    pub fn load_configured(&self, paths: &PathsConfig) -> Result<Vec<String>, ServiceError> {
        self.load_all(&paths.resolved_skills_root())
    }

    pub fn unload(&self, name: &str) -> bool {
        let mut skills = match self.skills.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        skills.remove(name).is_some()
    }

    pub fn manifest(&self, name: &str) -> Option<Arc<Manifest>> {
        self.read_skills().get(name).map(|e| e.current())
    }

    pub fn tools(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self
            .read_skills()
            .values()
            .map(|entry| {
                let m = entry.current();
                ToolDescriptor {
                    name: m.name.clone(),
                    description: m.description.clone(),
                    input_schema: m.input_schema.clone(),
                }
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Validate `args` against the skill's inputs, execute, and return the result as-is.
    pub async fn invoke(&self, name: &str, args: &Value) -> Result<ExecutionResult, ServiceError> {
        let entry = self.entry(name)?;
        let _read = entry.gate.read().await;
        let loaded = entry.loaded();
        ops::run_manifest(&loaded.manifest, &loaded.validator, args, &self.options).await
    }

    /// Replace the cached manifest before the next call, or after the
    /// running repair if one holds the directory.
    pub fn request_reload(&self, name: &str) -> Result<ReloadStatus, ServiceError> {
        self.entry(name)?.request_reload()
    }

    /// Wait for in-flight invocations and take the directory for a repair.
    pub async fn lock_for_repair(&self, name: &str) -> Result<SkillDirGuard, ServiceError> {
        let entry = self.entry(name)?;
        let write = Arc::clone(&entry.gate).write_owned().await;
        entry.repairing.store(true, Ordering::SeqCst);
        Ok(SkillDirGuard {
            entry,
            _write: write,
        })
    }

    /// Refine a loaded skill while holding its directory; the cache is
    /// refreshed when the loop ends.
    pub async fn refine<P: SkillProvider>(
        &self,
        name: &str,
        orchestrator: &RepairOrchestrator<P>,
        instruction: &str,
    ) -> Result<RepairOutcome, ServiceError> {
        let guard = self.lock_for_repair(name).await?;
        let outcome = ops::refine(orchestrator, guard.skill_dir(), instruction).await;
        guard.entry.reload_pending.store(true, Ordering::SeqCst);
        drop(guard);
        Ok(outcome)
    }

    /// Name of the loaded skill whose directory is `dir`.
    pub(crate) fn name_for_dir(&self, dir: &Path) -> Option<String> {
        let dir = canonical(dir);
        self.read_skills()
            .iter()
            .find(|(_, entry)| entry.dir == dir)
            .map(|(name, _)| name.clone())
    }
}

pub(crate) fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::{echo_skill, ECHO_MANIFEST};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn loaded() -> (TempDir, SkillHost) {
        let tmp = TempDir::new().unwrap();
        echo_skill(tmp.path());
        let host = SkillHost::default();
        assert_eq!(host.load(tmp.path()).unwrap(), "echo");
        (tmp, host)
    }

    #[test]
    fn test_tools_and_manifest() {
        let (_tmp, host) = loaded();
        let tools = host.tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].input_schema["required"][0], "msg");
        assert!(host.manifest("nope").is_none());
        assert!(host.unload("echo"));
        assert!(host.tools().is_empty());
    }

    #[test]
    fn test_load_all_skips_broken() {
        let root = TempDir::new().unwrap();
        echo_skill(&root.path().join("echo"));
        fs::create_dir_all(root.path().join("broken")).unwrap();
        fs::write(root.path().join("broken/SKILL.md"), "no front matter").unwrap();
        fs::create_dir_all(root.path().join("empty")).unwrap();

        let host = SkillHost::default();
        assert_eq!(host.load_all(root.path()).unwrap(), vec!["echo"]);
    }

    #[test]
    fn test_load_configured_uses_skills_root() {
        let root = TempDir::new().unwrap();
        echo_skill(&root.path().join("skills").join("echo"));
        let paths = PathsConfig {
            workspace: root.path().to_path_buf(),
            skills_root: None,
        };
        assert_eq!(SkillHost::default().load_configured(&paths).unwrap(), vec!["echo"]);
    }

    #[tokio::test]
    async fn test_invoke_rejects_bad_args_and_unknown_skill() {
        let (_tmp, host) = loaded();
        assert!(matches!(
            host.invoke("echo", &json!({})).await,
            Err(ServiceError::InvalidInput { .. })
        ));
        assert!(matches!(
            host.invoke("missing", &json!({})).await,
            Err(ServiceError::UnknownSkill(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_returns_result_as_is() {
        let (_tmp, host) = loaded();
        let result = host.invoke("echo", &json!({"msg": "hi"})).await.unwrap();
        assert_eq!(result.output(), Some(&json!({"msg": "hi"})));
    }

    #[test]
    fn test_reload_replaces_manifest() {
        let (tmp, host) = loaded();
        let before = host.manifest("echo").unwrap();
        fs::write(
            tmp.path().join("SKILL.md"),
            ECHO_MANIFEST.replace("Echo the input", "Echo v2"),
        )
        .unwrap();
        assert_eq!(host.request_reload("echo").unwrap(), ReloadStatus::Reloaded);
        assert_eq!(host.manifest("echo").unwrap().description, "Echo v2");
        assert_eq!(before.description, "Echo the input");
    }

    #[test]
    fn test_failed_reload_keeps_previous_manifest() {
        let (tmp, host) = loaded();
        fs::write(tmp.path().join("SKILL.md"), "garbage").unwrap();
        assert!(host.request_reload("echo").is_err());
        assert_eq!(host.manifest("echo").unwrap().description, "Echo the input");
    }

    #[tokio::test]
    async fn test_invalid_input_schema_is_a_load_error() {
        let tmp = TempDir::new().unwrap();
        echo_skill(tmp.path());
        let broken = ECHO_MANIFEST.replace("type: string", "type: 12");
        let host = SkillHost::default();
        fs::write(tmp.path().join("SKILL.md"), &broken).unwrap();
        assert!(matches!(
            host.load(tmp.path()),
            Err(ServiceError::InvalidSchema { ref skill, .. }) if skill == "echo"
        ));

        // A reload to a broken schema keeps the previously compiled validator
        fs::write(tmp.path().join("SKILL.md"), ECHO_MANIFEST).unwrap();
        host.load(tmp.path()).unwrap();
        fs::write(tmp.path().join("SKILL.md"), &broken).unwrap();
        assert!(matches!(
            host.request_reload("echo"),
            Err(ServiceError::InvalidSchema { .. })
        ));
        assert!(matches!(
            host.invoke("echo", &json!({"msg": 3})).await,
            Err(ServiceError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_debounce_comes_from_config() {
        assert_eq!(SkillHost::default().reload_debounce_ms(), DEFAULT_RELOAD_DEBOUNCE_MS);
        let config = RuntimeConfig {
            reload_debounce_ms: 75,
            ..RuntimeConfig::default()
        };
        assert_eq!(SkillHost::from_config(&config).reload_debounce_ms(), 75);
    }

    #[tokio::test]
    async fn test_reloads_during_repair_are_coalesced() {
        let (tmp, host) = loaded();
        let guard = host.lock_for_repair("echo").await.unwrap();

        fs::write(
            tmp.path().join("SKILL.md"),
            ECHO_MANIFEST.replace("Echo the input", "first"),
        )
        .unwrap();
        assert_eq!(host.request_reload("echo").unwrap(), ReloadStatus::Deferred);
        fs::write(
            tmp.path().join("SKILL.md"),
            ECHO_MANIFEST.replace("Echo the input", "second"),
        )
        .unwrap();
        assert_eq!(host.request_reload("echo").unwrap(), ReloadStatus::Deferred);
        assert_eq!(host.manifest("echo").unwrap().description, "Echo the input");

        drop(guard);
        assert_eq!(host.manifest("echo").unwrap().description, "second");
        assert_eq!(host.request_reload("echo").unwrap(), ReloadStatus::Reloaded);
    }

    struct NoCalls;

    #[async_trait::async_trait]
    impl SkillProvider for NoCalls {
        async fn generate(
            &self,
            _request: &skillkit_evolution::GenerationRequest,
        ) -> anyhow::Result<skillkit_evolution::ProviderOutput> {
            anyhow::bail!("unexpected generate")
        }

        async fn repair(
            &self,
            _request: &skillkit_evolution::GenerationRequest,
            _report: &skillkit_evolution::RepairReport,
        ) -> anyhow::Result<skillkit_evolution::ProviderOutput> {
            anyhow::bail!("unexpected repair")
        }
    }

    #[tokio::test]
    async fn test_refine_refreshes_cache_afterwards() {
        let (tmp, host) = loaded();
        fs::write(
            tmp.path().join("SKILL.md"),
            ECHO_MANIFEST.replace("Echo the input", "refined"),
        )
        .unwrap();
        let orchestrator = RepairOrchestrator::new(NoCalls);
        let outcome = host.refine("echo", &orchestrator, "").await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(host.manifest("echo").unwrap().description, "refined");
    }

    #[tokio::test]
    async fn test_invoke_waits_for_repair() {
        let (_tmp, host) = loaded();
        let host = Arc::new(host);
        let guard = host.lock_for_repair("echo").await.unwrap();

        let h = Arc::clone(&host);
        let call = tokio::spawn(async move { h.invoke("echo", &json!({})).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!call.is_finished());

        drop(guard);
        let result = call.await.unwrap();
        assert!(matches!(result, Err(ServiceError::InvalidInput { .. })));
    }
}
