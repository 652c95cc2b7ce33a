//! Source directory settings, persisted as `config.json`.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::atomic::write_bytes_atomic;
use crate::error::{CatalogueError, Result};
use crate::locator::SourceKind;

/// Root directories searched for source data. Empty means "not configured".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePaths {
    #[serde(default)]
    pub lowmag_path: String,
    #[serde(default)]
    pub tiltseries_path: String,
    #[serde(default)]
    pub tomogram_path: String,
}

impl SourcePaths {
    /// Configured root for `kind`, if any.
    pub fn root(&self, kind: SourceKind) -> Option<PathBuf> {
        let raw = match kind {
            SourceKind::Lowmag => &self.lowmag_path,
            SourceKind::Tiltseries => &self.tiltseries_path,
            SourceKind::Tomogram => &self.tomogram_path,
        };
        let raw = raw.trim();
        (!raw.is_empty()).then(|| PathBuf::from(raw))
    }

    /// Default search roots: tomograms first, then tilt-series.
    pub fn search_roots(&self) -> Vec<(SourceKind, PathBuf)> {
        [SourceKind::Tomogram, SourceKind::Tiltseries]
            .into_iter()
            .filter_map(|kind| self.root(kind).map(|p| (kind, p)))
            .collect()
    }
}

/// Partial settings change. Omitted fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcePathsUpdate {
    pub lowmag_path: Option<String>,
    pub tiltseries_path: Option<String>,
    pub tomogram_path: Option<String>,
}

pub struct SettingsStore {
    config_file: PathBuf,
    paths: RwLock<SourcePaths>,
}

impl SettingsStore {
    /// Read `config_file`, writing defaults when it does not exist yet.
    /// A malformed file is logged and replaced by defaults in memory only.
    pub fn load(config_file: impl Into<PathBuf>) -> Result<Self> {
        let config_file = config_file.into();
        let paths = match std::fs::read_to_string(&config_file) {
            Ok(text) => match serde_json::from_str::<SourcePaths>(&text) {
                Ok(paths) => paths,
                Err(e) => {
                    tracing::warn!(
                        path = %config_file.display(),
                        error = %e,
                        "Malformed settings file, using defaults"
                    );
                    SourcePaths::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let defaults = SourcePaths::default();
                persist(&config_file, &defaults)?;
                tracing::info!(path = %config_file.display(), "Wrote default settings");
                defaults
            }
            Err(e) => return Err(CatalogueError::persistence(&config_file, e)),
        };

        Ok(Self {
            config_file,
            paths: RwLock::new(paths),
        })
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Current snapshot.
    pub fn paths(&self) -> SourcePaths {
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `update`, persist it, and return the new settings.
    pub fn update(&self, update: SourcePathsUpdate) -> Result<SourcePaths> {
        let mut guard = self.paths.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        if let Some(p) = update.lowmag_path {
            next.lowmag_path = p.trim().to_string();
        }
        if let Some(p) = update.tiltseries_path {
            next.tiltseries_path = p.trim().to_string();
        }
        if let Some(p) = update.tomogram_path {
            next.tomogram_path = p.trim().to_string();
        }
        persist(&self.config_file, &next)?;
        *guard = next.clone();
        tracing::info!(
            lowmag = %next.lowmag_path,
            tiltseries = %next.tiltseries_path,
            tomogram = %next.tomogram_path,
            "Updated source paths"
        );
        Ok(next)
    }
}

fn persist(path: &Path, paths: &SourcePaths) -> Result<()> {
    let json = serde_json::to_vec_pretty(paths)
        .map_err(|e| CatalogueError::validation(format!("cannot serialize settings: {e}")))?;
    write_bytes_atomic(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_writes_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config.json");
        let store = SettingsStore::load(&file).unwrap();
        assert_eq!(store.paths(), SourcePaths::default());
        assert!(file.exists());
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config.json");
        std::fs::write(&file, "{not json").unwrap();
        let store = SettingsStore::load(&file).unwrap();
        assert_eq!(store.paths(), SourcePaths::default());
    }

    #[test]
    fn test_update_is_partial_and_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config.json");
        let store = SettingsStore::load(&file).unwrap();
        store
            .update(SourcePathsUpdate {
                tomogram_path: Some(" /data/tomos ".into()),
                ..Default::default()
            })
            .unwrap();
        store
            .update(SourcePathsUpdate {
                lowmag_path: Some("/data/lowmag".into()),
                ..Default::default()
            })
            .unwrap();

        let reloaded = SettingsStore::load(&file).unwrap().paths();
        assert_eq!(reloaded.tomogram_path, "/data/tomos");
        assert_eq!(reloaded.lowmag_path, "/data/lowmag");
        assert_eq!(reloaded.root(SourceKind::Tiltseries), None);
        assert_eq!(
            reloaded.search_roots(),
            vec![(SourceKind::Tomogram, PathBuf::from("/data/tomos"))]
        );
    }
}
