// crates/core/src/error.rs
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced to callers on the synchronous request path.
///
/// Background work never produces these; job failures are captured as
/// strings on the job record instead.
#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Session not found: {name}")]
    SessionNotFound { name: String },

    #[error("Tomogram not found in session {session}: {tomo_name}")]
    EntryNotFound { session: String, tomo_name: String },

    #[error("Session already exists: {name}")]
    SessionExists { name: String },

    #[error("IO error at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CatalogueError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn persistence(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Classify an IO error on a session file. A missing file is a normal
    /// negative result, everything else is a persistence failure.
    pub fn session_io(name: &str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::SessionNotFound {
                name: name.to_string(),
            },
            _ => Self::persistence(path, source),
        }
    }

    /// True for the "normal negative result" variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound { .. } | Self::EntryNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CatalogueError>;
