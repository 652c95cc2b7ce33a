//! Crash-safe file replacement.
//!
//! Content is written to a temporary file in the target's directory, synced,
//! then renamed over the target. If the writer fails the temp file is dropped
//! (and deleted) and the target keeps its previous bytes.

use std::io::{self, Write};
use std::path::Path;

use crate::error::{CatalogueError, Result};

/// Replace `path` with whatever `write` produces.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".tomcat-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| CatalogueError::persistence(dir, e))?;

    let file: &mut dyn Write = tmp.as_file_mut();
    write(&mut *file)
        .and_then(|()| file.flush())
        .map_err(|e| CatalogueError::persistence(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| CatalogueError::persistence(path, e))?;

    tmp.persist(path)
        .map_err(|e| CatalogueError::persistence(path, e.error))?;
    Ok(())
}

/// Replace `path` with `bytes`.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic(path, |w| w.write_all(bytes))
}
