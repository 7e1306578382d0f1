//! Debounced watcher that turns `SKILL.md` / `policy.yaml` edits into reloads.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

// notify types come through the debouncer so both agree on the notify version
use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer};

use skillkit_core::skill::manifest::{MANIFEST_FILE_NAME, POLICY_FILE_NAME};

use crate::error::ServiceError;
use crate::host::{canonical, SkillHost};

/// Keeps the watcher alive; dropping it stops watching.
pub struct SkillWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    watched: Vec<PathBuf>,
}

impl SkillWatcher {
    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.watched
    }
}

impl Drop for SkillWatcher {
    fn drop(&mut self) {
        tracing::debug!(dirs = ?self.watched, "skill watcher dropped");
    }
}

/// Skill directories whose manifest or policy changed in this batch.
pub(crate) fn changed_skill_dirs(events: &[DebouncedEvent]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = events
        .iter()
        .filter(|e| is_watched_file(&e.path))
        .filter_map(|e| e.path.parent().map(canonical))
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}

fn is_watched_file(path: &Path) -> bool {
    matches!(
        path.file_name().and_then(|n| n.to_str()),
        Some(MANIFEST_FILE_NAME) | Some(POLICY_FILE_NAME)
    )
}

impl SkillHost {
    /// Watch every loaded skill directory with the configured debounce.
    /// Skills loaded later are not watched until `watch` is called again.
    pub fn watch(self: &Arc<Self>) -> Result<SkillWatcher, ServiceError> {
        self.watch_with_debounce(self.reload_debounce_ms())
    }

    pub fn watch_with_debounce(self: &Arc<Self>, debounce_ms: u64) -> Result<SkillWatcher, ServiceError> {
        let host: Weak<SkillHost> = Arc::downgrade(self);
        let mut debouncer = new_debouncer(
            Duration::from_millis(debounce_ms),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let Some(host) = host.upgrade() else {
                        return;
                    };
                    for dir in changed_skill_dirs(&events) {
                        let Some(name) = host.name_for_dir(&dir) else {
                            continue;
                        };
                        match host.request_reload(&name) {
                            Ok(status) => tracing::debug!(skill = %name, ?status, "file change handled"),
                            Err(e) => tracing::warn!(skill = %name, "reload after file change failed: {}", e),
                        }
                    }
                }
                Err(err) => tracing::warn!(error = %err, "skill watcher error"),
            },
        )
        .map_err(|e| ServiceError::Watch(e.to_string()))?;

        let mut watched = Vec::new();
        for entry in self.entries() {
            debouncer
                .watcher()
                .watch(&entry.dir, RecursiveMode::NonRecursive)
                .map_err(|e| ServiceError::Watch(format!("{}: {}", entry.dir.display(), e)))?;
            watched.push(entry.dir.clone());
        }
        watched.sort();
        tracing::info!(dirs = ?watched, debounce_ms, "skill watcher started");

        Ok(SkillWatcher {
            _debouncer: debouncer,
            watched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::{echo_skill, ECHO_MANIFEST};
    use notify_debouncer_mini::DebouncedEventKind;
    use std::fs;
    use tempfile::TempDir;

    fn event(path: PathBuf) -> DebouncedEvent {
        DebouncedEvent {
            path,
            kind: DebouncedEventKind::Any,
        }
    }

    #[test]
    fn test_only_manifest_and_policy_count() {
        let tmp = TempDir::new().unwrap();
        let dir = canonical(tmp.path());
        let events = vec![
            event(dir.join("SKILL.md")),
            event(dir.join("policy.yaml")),
            event(dir.join("scripts").join("run.sh")),
            event(dir.join("notes.txt")),
        ];
        assert_eq!(changed_skill_dirs(&events), vec![dir]);
        assert!(changed_skill_dirs(&[event(tmp.path().join("x.md"))]).is_empty());
    }

    #[tokio::test]
    async fn test_edit_triggers_reload() {
        let tmp = TempDir::new().unwrap();
        echo_skill(tmp.path());
        let host = Arc::new(SkillHost::default().with_reload_debounce_ms(50));
        host.load(tmp.path()).unwrap();
        let watcher = host.watch().unwrap();
        assert_eq!(watcher.watched_dirs().len(), 1);

        fs::write(
            tmp.path().join("SKILL.md"),
            ECHO_MANIFEST.replace("Echo the input", "edited"),
        )
        .unwrap();

        let mut reloaded = false;
        for _ in 0..60 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if host.manifest("echo").unwrap().description == "edited" {
                reloaded = true;
                break;
            }
        }
        assert!(reloaded);
    }
}
