//! Patch application for skill directories.
//!
//! Two shapes of change are accepted: full-file writes and unified diffs.
//! Every target is checked against a [`WriteAllowlist`] before anything
//! touches disk, and a diff is applied to all of its files or to none.

mod allowlist;
mod diff;
mod error;
mod writes;

pub use allowlist::{WriteAllowlist, DEFAULT_ALLOWED_DIRS, DEFAULT_ALLOWED_FILES};
pub use diff::{apply_unified_diff, parse_unified_diff, FilePatch, Hunk, HunkLine};
pub use error::PatchError;
pub use writes::{apply_writes, atomic_write, AppliedPatch, FileWrite};
