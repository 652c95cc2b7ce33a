//! Session archives: the session file plus its derived media in one zip.
//!
//! ```text
//! <session file>
//! media/<tomo_name>/<media file>
//! ```

use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::atomic::write_bytes_atomic;
use crate::error::{CatalogueError, Result};
use crate::store::{validate_session_name, SessionStore};

const MEDIA_PREFIX: &str = "media";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub session: String,
    pub entry_count: usize,
    pub media_files: usize,
}

/// Bundle `session_name` and every derived media file of its tomograms.
pub fn export_archive(store: &SessionStore, session_name: &str, media_dir: &Path) -> Result<Vec<u8>> {
    let session = store.load(session_name)?;
    let raw = store.read_raw(session_name)?;
    let zip_err = |e: zip::result::ZipError| CatalogueError::persistence(media_dir, io::Error::from(e));

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    zip.start_file(session_name, options).map_err(zip_err)?;
    zip.write_all(&raw)
        .map_err(|e| CatalogueError::persistence(session_name, e))?;

    let mut media_files = 0usize;
    for tomo_name in session.tomo_names() {
        let dir = media_dir.join(tomo_name);
        let Ok(read_dir) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut files: Vec<PathBuf> = read_dir
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        for path in files {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let bytes = std::fs::read(&path).map_err(|e| CatalogueError::persistence(&path, e))?;
            zip.start_file(format!("{MEDIA_PREFIX}/{tomo_name}/{file_name}"), options)
                .map_err(zip_err)?;
            zip.write_all(&bytes)
                .map_err(|e| CatalogueError::persistence(&path, e))?;
            media_files += 1;
        }
    }

    let cursor = zip.finish().map_err(zip_err)?;
    tracing::info!(
        session = %session_name,
        entries = session.len(),
        media_files,
        "Exported session archive"
    );
    Ok(cursor.into_inner())
}

/// Restore an archive produced by [`export_archive`].
///
/// The whole archive is checked before anything is written: every entry must
/// stay inside the archive root and exactly one valid session file must sit at
/// the top level. Existing files with the same names are replaced.
pub fn import_archive(bytes: &[u8], store: &SessionStore, media_dir: &Path) -> Result<ImportReport> {
    let mut zip = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| CatalogueError::validation(format!("not a zip archive: {e}")))?;

    let mut session_file: Option<(String, Vec<u8>)> = None;
    let mut media: Vec<(String, String, Vec<u8>)> = Vec::new();

    for i in 0..zip.len() {
        let mut file = zip
            .by_index(i)
            .map_err(|e| CatalogueError::validation(format!("corrupt archive entry {i}: {e}")))?;
        let raw_name = file.name().to_string();
        let Some(path) = file.enclosed_name().filter(|p| !p.is_absolute()) else {
            return Err(CatalogueError::validation(format!(
                "archive entry escapes the archive root: {raw_name}"
            )));
        };
        if file.is_dir() {
            continue;
        }

        let parts: Vec<String> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        match parts.as_slice() {
            [name] if validate_session_name(name).is_ok() => {
                if let Some((existing, _)) = &session_file {
                    return Err(CatalogueError::validation(format!(
                        "archive contains more than one session file: {existing}, {name}"
                    )));
                }
                session_file = Some((name.clone(), read_entry(&mut file, &raw_name)?));
            }
            [prefix, tomo, file_name] if prefix == MEDIA_PREFIX => {
                media.push((tomo.clone(), file_name.clone(), read_entry(&mut file, &raw_name)?));
            }
            _ => tracing::debug!(entry = %raw_name, "Ignoring unrecognised archive entry"),
        }
    }

    let Some((session_name, session_bytes)) = session_file else {
        return Err(CatalogueError::validation(
            "archive does not contain a session file",
        ));
    };

    // Decodes before writing, so a bad session file leaves everything untouched.
    let session = store.import_upload(&session_name, &session_bytes)?;

    let mut media_files = 0usize;
    for (tomo, file_name, bytes) in media {
        if !session.contains(&tomo) {
            tracing::debug!(tomo = %tomo, "Skipping media for tomogram not in session");
            continue;
        }
        let dir = media_dir.join(&tomo);
        std::fs::create_dir_all(&dir).map_err(|e| CatalogueError::persistence(&dir, e))?;
        write_bytes_atomic(&dir.join(&file_name), &bytes)?;
        media_files += 1;
    }

    tracing::info!(
        session = %session.name(),
        entries = session.len(),
        media_files,
        "Imported session archive"
    );
    Ok(ImportReport {
        session: session.name().to_string(),
        entry_count: session.len(),
        media_files,
    })
}

fn read_entry(file: &mut impl Read, name: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| CatalogueError::validation(format!("cannot read archive entry {name}: {e}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryUpdate;
    use pretty_assertions::assert_eq;

    fn fixture() -> (tempfile::TempDir, SessionStore, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::open(tmp.path().join("uploads")).unwrap();
        let media = tmp.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        (tmp, store, media)
    }

    fn zip_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn uploads(store: &SessionStore) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_export_then_import_restores_session_and_media() {
        let (_tmp, store, media) = fixture();
        store.create(Some("grid")).unwrap();
        store
            .update("grid.tomcat", |s| {
                s.add_entries(["TS_01", "TS_02"])?;
                s.upsert(&EntryUpdate::new("TS_01").notes("keep"))
            })
            .unwrap();
        std::fs::create_dir_all(media.join("TS_01")).unwrap();
        std::fs::write(media.join("TS_01").join("thumbnail.jpg"), b"jpeg").unwrap();

        let bytes = export_archive(&store, "grid.tomcat", &media).unwrap();

        let (_tmp2, store2, media2) = fixture();
        let report = import_archive(&bytes, &store2, &media2).unwrap();
        assert_eq!(
            report,
            ImportReport {
                session: "grid.tomcat".into(),
                entry_count: 2,
                media_files: 1,
            }
        );
        assert_eq!(
            store2.read_raw("grid.tomcat").unwrap(),
            store.read_raw("grid.tomcat").unwrap()
        );
        assert_eq!(
            std::fs::read(media2.join("TS_01").join("thumbnail.jpg")).unwrap(),
            b"jpeg"
        );
    }

    #[test]
    fn test_import_rejects_traversal() {
        let (_tmp, store, media) = fixture();
        let bytes = zip_of(&[
            ("s.tomcat", b"tomo_name\nA\n"),
            ("../evil.tomcat", b"tomo_name\nB\n"),
        ]);
        let err = import_archive(&bytes, &store, &media).unwrap_err();
        assert!(matches!(err, CatalogueError::Validation(_)));
        assert!(uploads(&store).is_empty());
    }

    #[test]
    fn test_traversing_tomo_names_never_reach_export() {
        let (tmp, store, media) = fixture();
        std::fs::write(tmp.path().join("secret.txt"), b"private").unwrap();

        let err = store.import_upload("s.tomcat", b"tomo_name\n..\n").unwrap_err();
        assert!(matches!(err, CatalogueError::Validation(_)));

        // A hand-edited file on disk is refused at load time as well.
        std::fs::write(store.dir().join("s.tomcat"), b"tomo_name\n..\n").unwrap();
        let err = export_archive(&store, "s.tomcat", &media).unwrap_err();
        assert!(matches!(err, CatalogueError::Validation(_)));
    }

    #[test]
    fn test_import_requires_one_valid_session_file() {
        let (_tmp, store, media) = fixture();

        let none = zip_of(&[("media/A/thumbnail.jpg", b"x")]);
        assert!(import_archive(&none, &store, &media).is_err());

        let two = zip_of(&[("a.tomcat", b"tomo_name\nA\n"), ("b.csv", b"tomo_name\nB\n")]);
        assert!(import_archive(&two, &store, &media).is_err());

        let bad = zip_of(&[("a.tomcat", b"not,a,session\n1,2,3\n")]);
        assert!(import_archive(&bad, &store, &media).is_err());

        assert!(import_archive(b"garbage", &store, &media).is_err());
        assert!(uploads(&store).is_empty());
        assert!(!media.join("A").exists());
    }
}
