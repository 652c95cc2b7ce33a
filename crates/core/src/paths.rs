//! Centralized path functions for all app storage locations.
//!
//! Everything lives under one data directory:
//!
//! ```text
//! <data_dir>/config.json
//! <data_dir>/uploads/<session files>
//! <data_dir>/media/<tomo_name>/<derived files>
//! ```

use std::path::{Path, PathBuf};

use crate::error::{CatalogueError, Result};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TOMCAT_DATA_DIR";

/// Directory name used under the working directory when no override is set.
pub const DEFAULT_DATA_DIR_NAME: &str = ".tomcat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    data_dir: PathBuf,
}

impl DataLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// `$TOMCAT_DATA_DIR`, else `<cwd>/.tomcat`.
    pub fn from_env() -> Self {
        let dir = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(DEFAULT_DATA_DIR_NAME)
            });
        Self::new(dir)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Session files.
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Derived media cache.
    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join("media")
    }

    /// Create every directory in the layout.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.data_dir.clone(), self.uploads_dir(), self.media_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| CatalogueError::persistence(&dir, e))?;
            tracing::debug!(dir = %dir.display(), "Ensured directory exists");
        }
        Ok(())
    }
}
