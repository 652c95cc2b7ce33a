//! Finding source data files for tomograms under the configured roots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::entry::validate_tomo_name;

/// Which configured root a file comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Lowmag,
    Tiltseries,
    Tomogram,
}

impl SourceKind {
    /// Recognised file name endings, most specific first.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Tomogram => &["_rec.mrc", ".rec.mrc", ".mrc", ".rec", "_rec"],
            Self::Tiltseries => &["_ali.mrc", ".st.mrc", ".ali", ".st"],
            Self::Lowmag => &[".tiff", ".jpeg", ".mrc", ".dm4", ".tif", ".jpg", ".png"],
        }
    }

    /// Higher wins when two files consolidate to the same name.
    pub fn priority(self) -> u8 {
        match self {
            Self::Lowmag => 1,
            Self::Tiltseries => 2,
            Self::Tomogram => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lowmag => "lowmag",
            Self::Tiltseries => "tiltseries",
            Self::Tomogram => "tomogram",
        }
    }

    /// Index of the matching extension in [`Self::extensions`].
    fn match_extension(self, file_name_lower: &str) -> Option<usize> {
        self.extensions()
            .iter()
            .position(|ext| file_name_lower.ends_with(ext))
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One consolidated search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub filename: String,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Cannot read directory {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
}

/// Suffixes stripped before pattern cleanup, in order of specificity.
const STRIP_SUFFIXES: &[&str] = &[
    "_rec.mrc", "_rec", ".rec.mrc", ".rec", ".mrc", "_ali.mrc", "_ali", ".ali.mrc", ".ali", ".st",
    ".st.mrc", ".dm4", ".tif", ".tiff", ".jpg", ".jpeg", ".png",
];

fn processing_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)_rec",
            r"(?i)_ali",
            r"(?i)_bin\d+$",
            r"(?i)_\d+\.\d+Apx$",
            r"(?i)_\d+k$",
            r"(?i)_[a-z]+\d+$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Reduce a data file name to the tomogram name it belongs to.
///
/// `TS_01_rec.mrc`, `TS_01_ali.mrc` and `TS_01_bin4.mrc` all give `TS_01`.
pub fn extract_basename(file_name: &str) -> String {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_name);

    let mut name = STRIP_SUFFIXES
        .iter()
        .find_map(|suffix| strip_suffix_ignore_case(name, suffix))
        .unwrap_or(name)
        .to_string();

    for pattern in processing_patterns() {
        if let Some(m) = pattern.find(&name) {
            name.truncate(m.start());
        }
    }
    name
}

fn strip_suffix_ignore_case<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let split = name.len().checked_sub(suffix.len())?;
    if !name.is_char_boundary(split) || !name[split..].eq_ignore_ascii_case(suffix) {
        return None;
    }
    Some(&name[..split])
}

/// Locate the source file of `kind` for `tomo_name` under `root`.
///
/// An exact `<root>/<tomo_name><ext>` wins. Otherwise the tree is walked and
/// files whose basename equals `tomo_name` are preferred over files that merely
/// contain it; ties go to the more specific extension.
pub fn find_source(tomo_name: &str, root: &Path, kind: SourceKind) -> Option<PathBuf> {
    if !root.is_dir() {
        tracing::warn!(root = %root.display(), kind = %kind, "Source directory not found");
        return None;
    }

    for ext in kind.extensions() {
        let exact = root.join(format!("{tomo_name}{ext}"));
        if exact.is_file() {
            return Some(exact);
        }
    }

    let needle = tomo_name.to_lowercase();
    // (exact basename, extension rank, path)
    let mut best: Option<(bool, usize, PathBuf)> = None;
    for entry in WalkDir::new(root).follow_links(true).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let lower = file_name.to_lowercase();
        if !lower.contains(&needle) {
            continue;
        }
        let Some(rank) = kind.match_extension(&lower) else {
            continue;
        };
        let exact = extract_basename(&file_name).to_lowercase() == needle;
        let better = match &best {
            None => true,
            Some((best_exact, best_rank, _)) => {
                (exact && !best_exact) || (exact == *best_exact && rank < *best_rank)
            }
        };
        if better {
            best = Some((exact, rank, entry.into_path()));
        }
    }

    if best.is_none() {
        tracing::debug!(tomo = %tomo_name, root = %root.display(), kind = %kind, "No source file found");
    }
    best.map(|(_, _, path)| path)
}

/// Walk each root and collect files whose name contains `basename`,
/// consolidated by extracted tomogram name. Missing roots are skipped; an
/// unreadable directory fails the whole search.
pub fn search_tomograms(
    basename: &str,
    roots: &[(SourceKind, PathBuf)],
) -> Result<Vec<SearchCandidate>, SearchError> {
    let needle = basename.trim().to_lowercase();
    let mut found: HashMap<String, SearchCandidate> = HashMap::new();

    for (kind, root) in roots {
        if *kind == SourceKind::Lowmag {
            continue;
        }
        if !root.exists() {
            tracing::debug!(root = %root.display(), "Search root missing, skipping");
            continue;
        }

        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry.map_err(|e| SearchError::Unreadable {
                path: e.path().unwrap_or(root.as_path()).to_path_buf(),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let lower = file_name.to_lowercase();
            if !lower.contains(&needle) || kind.match_extension(&lower).is_none() {
                continue;
            }

            let name = extract_basename(&file_name);
            if validate_tomo_name(&name).is_err() {
                tracing::debug!(file = %file_name, "No usable tomogram name, skipping");
                continue;
            }
            let replace = found
                .get(&name)
                .map_or(true, |existing| kind.priority() > existing.kind.priority());
            if replace {
                found.insert(
                    name.clone(),
                    SearchCandidate {
                        name,
                        path: entry.into_path(),
                        kind: *kind,
                        filename: file_name,
                    },
                );
            }
        }
    }

    let mut candidates: Vec<SearchCandidate> = found.into_values().collect();
    candidates.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!(basename = %basename, count = candidates.len(), "Search finished");
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_extract_basename() {
        assert_eq!(extract_basename("TS_01_rec.mrc"), "TS_01");
        assert_eq!(extract_basename("TS_01_ali.mrc"), "TS_01");
        assert_eq!(extract_basename("TS_01.st"), "TS_01");
        assert_eq!(extract_basename("/data/TS_01.mrc"), "TS_01");
        assert_eq!(extract_basename("TS_01_bin4.mrc"), "TS_01");
        assert_eq!(extract_basename("TS_01_10.00Apx.mrc"), "TS_01");
        assert_eq!(extract_basename("TS_01_8k.mrc"), "TS_01");
        assert_eq!(extract_basename("lamella3.png"), "lamella3");
    }

    #[test]
    fn test_search_matches_substring_only() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("TS_01.mrc"));
        touch(&tmp.path().join("TS_02.mrc"));

        let roots = vec![(SourceKind::Tomogram, tmp.path().to_path_buf())];
        let hits = search_tomograms("TS_01", &roots).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "TS_01");
    }

    #[test]
    fn test_search_consolidates_with_tomogram_priority() {
        let tmp = tempfile::tempdir().unwrap();
        let tomos = tmp.path().join("tomos");
        let tilts = tmp.path().join("tilts");
        touch(&tomos.join("nested").join("TS_03_rec.mrc"));
        touch(&tilts.join("TS_03_ali.mrc"));
        touch(&tilts.join("TS_04.st"));
        touch(&tilts.join("TS_05.txt"));

        let roots = vec![
            (SourceKind::Tiltseries, tilts.clone()),
            (SourceKind::Tomogram, tomos.clone()),
            (SourceKind::Tomogram, tmp.path().join("missing")),
        ];
        let hits = search_tomograms("ts_0", &roots).unwrap();
        assert_eq!(
            hits.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["TS_03", "TS_04"]
        );
        assert_eq!(hits[0].kind, SourceKind::Tomogram);
        assert_eq!(hits[0].filename, "TS_03_rec.mrc");
        assert_eq!(hits[1].kind, SourceKind::Tiltseries);
    }

    #[test]
    fn test_search_skips_files_without_a_name() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("_rec.mrc"));
        touch(&tmp.path().join("TS_07_rec.mrc"));

        let roots = vec![(SourceKind::Tomogram, tmp.path().to_path_buf())];
        let hits = search_tomograms("_rec", &roots).unwrap();
        assert_eq!(
            hits.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["TS_07"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_search_fails_on_unreadable_directory() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let locked = tmp.path().join("locked");
        touch(&locked.join("TS_01.mrc"));
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        let roots = vec![(SourceKind::Tomogram, tmp.path().to_path_buf())];
        let result = search_tomograms("TS_01", &roots);

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        // Root ignores directory permissions.
        if std::fs::read_dir(&locked).is_ok() && result.is_ok() {
            return;
        }
        assert!(matches!(result, Err(SearchError::Unreadable { .. })));
    }

    #[test]
    fn test_find_source_prefers_exact_then_basename() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("sub").join("TS_01_extra.mrc"));
        touch(&tmp.path().join("sub").join("TS_01_rec.mrc"));

        let found = find_source("TS_01", tmp.path(), SourceKind::Tomogram).unwrap();
        assert!(found.ends_with("TS_01_rec.mrc"));

        touch(&tmp.path().join("TS_01.mrc"));
        let found = find_source("TS_01", tmp.path(), SourceKind::Tomogram).unwrap();
        assert_eq!(found, tmp.path().join("TS_01.mrc"));

        assert!(find_source("TS_99", tmp.path(), SourceKind::Tomogram).is_none());
        assert!(find_source("TS_01", &tmp.path().join("nope"), SourceKind::Tomogram).is_none());
    }
}
