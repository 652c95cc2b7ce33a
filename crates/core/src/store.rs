//! On-disk session files.
//!
//! Every session is one file in the uploads directory. Writes go through
//! [`write_atomic`](crate::atomic::write_atomic) and are serialized by a
//! per-session lock, so a read-modify-write via [`SessionStore::update`] never
//! interleaves with another writer of the same session.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::atomic::{write_atomic, write_bytes_atomic};
use crate::codec;
use crate::entry::EntryUpdate;
use crate::error::{CatalogueError, Result};
use crate::session::{BulkReport, Session};

/// Extension given to newly created sessions.
pub const SESSION_EXTENSION: &str = "tomcat";

/// Extensions accepted for session files.
const ACCEPTED_EXTENSIONS: [&str; 2] = ["tomcat", "csv"];

/// Listing row for the session picker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub filename: String,
    pub modified: String,
    pub entry_count: usize,
}

pub struct SessionStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    /// Open the store rooted at `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CatalogueError::persistence(&dir, e))?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a session name to its file, rejecting anything that could
    /// escape the uploads directory.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_session_name(name)?;
        Ok(self.dir.join(name))
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Session files, most recently modified first.
    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        let read_dir =
            std::fs::read_dir(&self.dir).map_err(|e| CatalogueError::persistence(&self.dir, e))?;

        let mut rows: Vec<(std::time::SystemTime, SessionSummary)> = Vec::new();
        for dir_entry in read_dir.flatten() {
            let filename = dir_entry.file_name().to_string_lossy().into_owned();
            if validate_session_name(&filename).is_err() {
                continue;
            }
            let meta = match dir_entry.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
            let entry_count = match self.load(&filename) {
                Ok(session) => session.len(),
                Err(e) => {
                    tracing::warn!(session = %filename, error = %e, "Skipping unreadable session file");
                    continue;
                }
            };
            rows.push((
                mtime,
                SessionSummary {
                    modified: DateTime::<Utc>::from(mtime).to_rfc3339(),
                    filename,
                    entry_count,
                },
            ));
        }

        rows.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.filename.cmp(&b.1.filename)));
        Ok(rows.into_iter().map(|(_, s)| s).collect())
    }

    /// Create an empty session. Without a name one is generated from the
    /// current time.
    pub fn create(&self, custom_name: Option<&str>) -> Result<Session> {
        let name = match custom_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(raw) => session_filename(raw)?,
            None => format!(
                "tomcat_session_{}.{SESSION_EXTENSION}",
                Utc::now().timestamp()
            ),
        };
        let path = self.path_for(&name)?;

        let lock = self.lock_for(&name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if path.exists() {
            return Err(CatalogueError::SessionExists { name });
        }
        let session = Session::new(&name);
        self.write(&path, &session)?;
        tracing::info!(session = %name, "Created session");
        Ok(session)
    }

    pub fn load(&self, name: &str) -> Result<Session> {
        let path = self.path_for(name)?;
        let text =
            std::fs::read_to_string(&path).map_err(|e| CatalogueError::session_io(name, &path, e))?;
        codec::decode(name, &text)
    }

    /// Persist `session` under its own name.
    pub fn save(&self, session: &Session) -> Result<()> {
        let path = self.path_for(session.name())?;
        let lock = self.lock_for(session.name());
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write(&path, session)
    }

    fn write(&self, path: &Path, session: &Session) -> Result<()> {
        let text = codec::encode(session);
        write_atomic(path, |w| w.write_all(text.as_bytes()))?;
        tracing::debug!(session = %session.name(), entries = session.len(), "Saved session");
        Ok(())
    }

    /// Load, mutate and save under the session lock. Nothing is written when
    /// `f` fails.
    pub fn update<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        let path = self.path_for(name)?;
        let lock = self.lock_for(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut session = self.load(name)?;
        let out = f(&mut session)?;
        self.write(&path, &session)?;
        Ok(out)
    }

    /// Apply an autosave batch to the stored session.
    pub fn apply_bulk(&self, name: &str, updates: &[EntryUpdate]) -> Result<BulkReport> {
        let report = self.update(name, |session| session.apply_bulk(updates))?;
        if !report.missing.is_empty() {
            tracing::warn!(
                session = %name,
                missing = ?report.missing,
                "Autosave named tomograms that are not in the session"
            );
        }
        Ok(report)
    }

    /// Store an uploaded session file. The bytes are decoded first, so a
    /// malformed upload never reaches the disk.
    pub fn import_upload(&self, name: &str, bytes: &[u8]) -> Result<Session> {
        let name = session_filename(name)?;
        let text = std::str::from_utf8(bytes).map_err(|_| {
            CatalogueError::validation(format!("session file {name} is not valid UTF-8"))
        })?;
        let session = codec::decode(&name, text)?;
        let path = self.path_for(&name)?;

        let lock = self.lock_for(&name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        write_bytes_atomic(&path, bytes)?;
        tracing::info!(session = %name, entries = session.len(), "Imported session file");
        Ok(session)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        let lock = self.lock_for(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        std::fs::remove_file(&path).map_err(|e| CatalogueError::session_io(name, &path, e))?;
        tracing::info!(session = %name, "Deleted session");
        Ok(())
    }

    /// Raw file bytes, for downloads.
    pub fn read_raw(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        std::fs::read(&path).map_err(|e| CatalogueError::session_io(name, &path, e))
    }
}

/// Names are plain file names with an accepted extension.
pub fn validate_session_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.contains(['/', '\\', '\0'])
        || name.contains("..")
        || name.starts_with('.');
    if bad {
        return Err(CatalogueError::validation(format!(
            "invalid session name {name:?}"
        )));
    }
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext {
        Some(ext) if ACCEPTED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(CatalogueError::validation(format!(
            "session name {name:?} must end in .tomcat or .csv"
        ))),
    }
}

/// Reduce user input to a safe file name, appending `.tomcat` unless it
/// already carries an accepted extension.
pub fn session_filename(raw: &str) -> Result<String> {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => cleaned.push(c),
            c if c.is_whitespace() => cleaned.push('_'),
            _ => {}
        }
    }
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_').to_string();
    if cleaned.is_empty() {
        return Err(CatalogueError::validation(format!(
            "session name {raw:?} has no usable characters"
        )));
    }

    let has_ext = Path::new(&cleaned)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| ACCEPTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    let name = if has_ext {
        cleaned
    } else {
        format!("{cleaned}.{SESSION_EXTENSION}")
    };
    validate_session_name(&name)?;
    Ok(name)
}
