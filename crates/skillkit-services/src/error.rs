use std::path::PathBuf;

use skillkit_core::skill::ParseError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("unknown skill '{0}'")]
    UnknownSkill(String),
    #[error("failed to load skill at {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("skill '{skill}' declares an invalid input schema: {message}")]
    InvalidSchema { skill: String, message: String },
    #[error("skill '{skill}' input is invalid: {message}")]
    InvalidInput { skill: String, message: String },
    #[error("a skill already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file watcher: {0}")]
    Watch(String),
}

impl ServiceError {
    pub(crate) fn load(path: impl Into<PathBuf>, source: ParseError) -> Self {
        Self::Load {
            path: path.into(),
            source,
        }
    }
}
