use std::path::PathBuf;

/// Why a patch was rejected. Nothing is written when any of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("write to '{0}' is outside the write allow-list")]
    DisallowedWritePath(String),
    #[error("path '{0}' escapes the skill root")]
    PathTraversal(String),
    #[error("patch context mismatch in {path} at line {line}: expected {expected:?}, found {found:?}")]
    ContextMismatch {
        path: String,
        line: usize,
        expected: String,
        found: Option<String>,
    },
    #[error("malformed diff: {0}")]
    MalformedDiff(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
