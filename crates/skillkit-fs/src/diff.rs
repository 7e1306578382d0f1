//! Unified diff parsing and strict, all-or-nothing application.

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use skillkit_core::observability;

use crate::allowlist::WriteAllowlist;
use crate::error::PatchError;
use crate::writes::{atomic_write, mark_executable_if_script, AppliedPatch};

const DEV_NULL: &str = "/dev/null";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<HunkLine>,
    /// `\ No newline at end of file` followed the last old-side line
    pub old_missing_newline: bool,
    /// `\ No newline at end of file` followed the last new-side line
    pub new_missing_newline: bool,
}

impl Hunk {
    fn old_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|l| match l {
            HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
            HunkLine::Add(_) => None,
        })
    }

    fn new_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|l| match l {
            HunkLine::Context(s) | HunkLine::Add(s) => Some(s.as_str()),
            HunkLine::Remove(_) => None,
        })
    }
}

/// All hunks for one file. `None` paths are `/dev/null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    /// Path the patch operates on: the new path, or the old one for deletions.
    pub fn target(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or(DEV_NULL)
    }

    pub fn is_creation(&self) -> bool {
        self.old_path.is_none()
    }

    pub fn is_deletion(&self) -> bool {
        self.new_path.is_none()
    }
}

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@")
            .expect("hunk header regex is valid")
    })
}

fn header_path(raw: &str) -> Option<String> {
    // Drop a trailing timestamp ("path\t2024-01-01 ...")
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == DEV_NULL {
        return None;
    }
    let stripped = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(stripped.to_string())
}

fn parse_count(cap: Option<regex::Match<'_>>) -> Result<usize, PatchError> {
    match cap {
        None => Ok(1),
        Some(m) => m
            .as_str()
            .parse()
            .map_err(|_| PatchError::MalformedDiff(format!("bad hunk count '{}'", m.as_str()))),
    }
}

fn is_body_line(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('+') || line.starts_with('-')
}

/// Parse a unified diff into per-file patches.
///
/// Hunk header counts are authoritative: a body that runs short of or past
/// them is a [`PatchError::MalformedDiff`].
pub fn parse_unified_diff(diff: &str) -> Result<Vec<FilePatch>, PatchError> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut patches = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let Some(old_raw) = lines[i].strip_prefix("--- ") else {
            // git preamble, "diff --git", "index ..." and other noise
            i += 1;
            continue;
        };
        let new_raw = lines
            .get(i + 1)
            .and_then(|l| l.strip_prefix("+++ "))
            .ok_or_else(|| {
                PatchError::MalformedDiff(format!("'--- {}' is not followed by a '+++' line", old_raw))
            })?;
        let old_path = header_path(old_raw);
        let new_path = header_path(new_raw);
        if old_path.is_none() && new_path.is_none() {
            return Err(PatchError::MalformedDiff(
                "both sides of a file header are /dev/null".to_string(),
            ));
        }
        i += 2;

        let mut hunks = Vec::new();
        while i < lines.len() && lines[i].starts_with("@@") {
            let (hunk, next) = parse_hunk(&lines, i)?;
            hunks.push(hunk);
            i = next;
        }
        let patch = FilePatch {
            old_path,
            new_path,
            hunks,
        };
        if patch.hunks.is_empty() {
            return Err(PatchError::MalformedDiff(format!(
                "no hunks for '{}'",
                patch.target()
            )));
        }
        // Anything hunk-shaped left before the next header means the counts lied
        if i < lines.len()
            && !lines[i].is_empty()
            && is_body_line(lines[i])
            && !lines[i].starts_with("--- ")
        {
            return Err(PatchError::MalformedDiff(format!(
                "'{}': hunk body is longer than its header counts",
                patch.target()
            )));
        }
        patches.push(patch);
    }

    if patches.is_empty() {
        return Err(PatchError::MalformedDiff("no file headers found".to_string()));
    }
    Ok(patches)
}

fn parse_hunk(lines: &[&str], start: usize) -> Result<(Hunk, usize), PatchError> {
    let header = lines[start];
    let caps = hunk_header_re()
        .captures(header)
        .ok_or_else(|| PatchError::MalformedDiff(format!("bad hunk header '{}'", header)))?;
    let old_start = parse_count(caps.get(1))?;
    let old_count = parse_count(caps.get(2))?;
    let new_start = parse_count(caps.get(3))?;
    let new_count = parse_count(caps.get(4))?;
    if old_start == 0 && old_count != 0 {
        return Err(PatchError::MalformedDiff(format!(
            "hunk '{}' starts at line 0 but removes lines",
            header
        )));
    }

    let mut hunk = Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: Vec::new(),
        old_missing_newline: false,
        new_missing_newline: false,
    };
    let (mut old_seen, mut new_seen) = (0usize, 0usize);
    let mut i = start + 1;

    loop {
        // A marker may trail the final body line
        if let Some(line) = lines.get(i) {
            if line.starts_with('\\') {
                match hunk.lines.last() {
                    Some(HunkLine::Remove(_)) => hunk.old_missing_newline = true,
                    Some(HunkLine::Add(_)) => hunk.new_missing_newline = true,
                    Some(HunkLine::Context(_)) => {
                        hunk.old_missing_newline = true;
                        hunk.new_missing_newline = true;
                    }
                    None => {
                        return Err(PatchError::MalformedDiff(format!(
                            "'\\ No newline' marker before any line in hunk '{}'",
                            header
                        )))
                    }
                }
                i += 1;
                continue;
            }
        }
        if old_seen == old_count && new_seen == new_count {
            break;
        }
        let Some(line) = lines.get(i) else {
            return Err(PatchError::MalformedDiff(format!(
                "hunk '{}' ends early: expected {} old / {} new lines, found {} / {}",
                header, old_count, new_count, old_seen, new_seen
            )));
        };
        let (kind, text) = match line.chars().next() {
            Some(' ') => ('c', &line[1..]),
            Some('-') => ('-', &line[1..]),
            Some('+') => ('+', &line[1..]),
            // Some tools strip the single space of an empty context line
            None => ('c', ""),
            Some(_) => {
                return Err(PatchError::MalformedDiff(format!(
                    "hunk '{}' ends early: expected {} old / {} new lines, found {} / {}",
                    header, old_count, new_count, old_seen, new_seen
                )))
            }
        };
        match kind {
            'c' => {
                old_seen += 1;
                new_seen += 1;
                hunk.lines.push(HunkLine::Context(text.to_string()));
            }
            '-' => {
                old_seen += 1;
                hunk.lines.push(HunkLine::Remove(text.to_string()));
            }
            _ => {
                new_seen += 1;
                hunk.lines.push(HunkLine::Add(text.to_string()));
            }
        }
        if old_seen > old_count || new_seen > new_count {
            return Err(PatchError::MalformedDiff(format!(
                "hunk '{}' body does not match its counts ({} old / {} new lines declared)",
                header, old_count, new_count
            )));
        }
        i += 1;
    }

    Ok((hunk, i))
}

/// File content as lines without terminators plus the trailing-newline flag.
fn split_content(content: &str) -> (Vec<String>, bool) {
    if content.is_empty() {
        return (Vec::new(), true);
    }
    let trailing = content.ends_with('\n');
    let body = if trailing {
        &content[..content.len() - 1]
    } else {
        content
    };
    (body.split('\n').map(str::to_string).collect(), trailing)
}

fn join_content(lines: &[String], trailing_newline: bool) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    out
}

/// Apply one file's hunks to `original` in order, tracking the running offset.
pub(crate) fn apply_hunks(path: &str, original: &str, hunks: &[Hunk]) -> Result<String, PatchError> {
    let (mut lines, mut trailing_newline) = split_content(original);
    let mut offset: isize = 0;

    for hunk in hunks {
        let old: Vec<&str> = hunk.old_lines().collect();
        let new: Vec<String> = hunk.new_lines().map(str::to_string).collect();

        // A pure insertion's start names the line it goes after
        let anchor = if hunk.old_count == 0 {
            hunk.old_start as isize
        } else {
            hunk.old_start as isize - 1
        };
        let at = anchor + offset;
        if at < 0 || at as usize + old.len() > lines.len() {
            return Err(PatchError::ContextMismatch {
                path: path.to_string(),
                line: (at.max(0) as usize) + 1,
                expected: old.first().copied().unwrap_or_default().to_string(),
                found: None,
            });
        }
        let at = at as usize;
        for (k, expected) in old.iter().enumerate() {
            let found = &lines[at + k];
            if found != expected {
                return Err(PatchError::ContextMismatch {
                    path: path.to_string(),
                    line: at + k + 1,
                    expected: expected.to_string(),
                    found: Some(found.clone()),
                });
            }
        }

        let touches_end = at + old.len() == lines.len();
        lines.splice(at..at + old.len(), new.iter().cloned());
        offset += new.len() as isize - old.len() as isize;

        if touches_end {
            if hunk.new_missing_newline {
                trailing_newline = false;
            } else if hunk.old_missing_newline || !new.is_empty() {
                trailing_newline = true;
            }
        }
    }

    Ok(join_content(&lines, trailing_newline))
}

/// Apply a unified diff to files under `skill_root`.
///
/// Every target is validated and every file's result computed in memory
/// first; disk is only touched once the whole diff applies cleanly.
pub fn apply_unified_diff(
    skill_root: &Path,
    diff: &str,
    allowlist: &WriteAllowlist,
) -> Result<AppliedPatch, PatchError> {
    let patches = parse_unified_diff(diff)?;

    let mut targets = Vec::with_capacity(patches.len());
    for patch in &patches {
        if let (Some(old), Some(new)) = (&patch.old_path, &patch.new_path) {
            if allowlist.check(old)? != allowlist.check(new)? {
                return Err(PatchError::MalformedDiff(format!(
                    "renaming '{}' to '{}' is not supported",
                    old, new
                )));
            }
        }
        if let Some(old) = &patch.old_path {
            allowlist.check_on_disk(skill_root, old)?;
        }
        targets.push(allowlist.check_on_disk(skill_root, patch.target())?);
    }

    // Staged content per target; `None` means remove
    let mut order: Vec<PathBuf> = Vec::new();
    let mut staged: HashMap<PathBuf, Option<String>> = HashMap::new();
    for (patch, rel) in patches.iter().zip(targets) {
        let display = rel.to_string_lossy().into_owned();
        let current = match staged.get(&rel) {
            Some(content) => content.clone().unwrap_or_default(),
            None => read_or_empty(&skill_root.join(&rel))?,
        };
        if patch.is_creation() && !current.is_empty() {
            return Err(PatchError::ContextMismatch {
                path: display,
                line: 1,
                expected: "<no file>".to_string(),
                found: current.lines().next().map(str::to_string),
            });
        }
        let updated = apply_hunks(&display, &current, &patch.hunks)?;
        if !staged.contains_key(&rel) {
            order.push(rel.clone());
        }
        staged.insert(rel, if patch.is_deletion() { None } else { Some(updated) });
    }

    let mut applied = AppliedPatch::default();
    for rel in order {
        let abs = skill_root.join(&rel);
        let name = rel.to_string_lossy().into_owned();
        match staged.remove(&rel).flatten() {
            Some(content) => {
                atomic_write(&abs, &content)?;
                mark_executable_if_script(&rel, &abs)?;
                applied.written.push(name);
            }
            None => {
                match std::fs::remove_file(&abs) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(PatchError::io(&abs, e)),
                }
                applied.removed.push(name);
            }
        }
    }

    tracing::info!(
        skill_root = %skill_root.display(),
        written = applied.written.len(),
        removed = applied.removed.len(),
        "applied unified diff"
    );
    observability::audit_patch_applied(&skill_root.display().to_string(), "diff", &applied.files());
    Ok(applied)
}

fn read_or_empty(path: &Path) -> Result<String, PatchError> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(PatchError::io(path, e)),
    }
}
