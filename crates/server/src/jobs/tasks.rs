// crates/server/src/jobs/tasks.rs
//! Turning [`JobParams`] into job bodies.

use std::path::PathBuf;
use std::sync::Arc;

use tomcat_core::{search_tomograms, SessionStore, SettingsStore, SourceKind};

use super::runner::JobRunner;
use super::types::{JobId, JobKind, JobOutput, JobParams, SearchOutput, SearchParams};
use crate::media::MediaTracker;

/// Everything a job body may need, shared with the request handlers.
#[derive(Clone)]
pub struct JobDispatcher {
    runner: Arc<JobRunner>,
    store: Arc<SessionStore>,
    settings: Arc<SettingsStore>,
    media: Arc<MediaTracker>,
}

impl JobDispatcher {
    pub fn new(
        runner: Arc<JobRunner>,
        store: Arc<SessionStore>,
        settings: Arc<SettingsStore>,
        media: Arc<MediaTracker>,
    ) -> Self {
        Self {
            runner,
            store,
            settings,
            media,
        }
    }

    /// Queue a job for `params`, or join the matching in-flight one.
    pub fn submit(&self, params: JobParams) -> JobId {
        match params {
            JobParams::Search(search) => {
                let roots = self.search_roots(&search);
                let key = search.dedup_key(&roots);
                let store = Arc::clone(&self.store);
                self.runner
                    .submit_task(JobKind::Search, key, move || run_search(&search, &roots, &store))
            }
            JobParams::Media(media) => self.media.ensure_job(media.media_type, &media.tomo_name),
        }
    }

    /// Explicit roots are searched as tomogram roots; otherwise the
    /// configured tomogram and tilt-series roots are used.
    fn search_roots(&self, params: &SearchParams) -> Vec<(SourceKind, PathBuf)> {
        if params.search_root_paths.is_empty() {
            self.settings.paths().search_roots()
        } else {
            params
                .search_root_paths
                .iter()
                .map(|p| (SourceKind::Tomogram, p.clone()))
                .collect()
        }
    }
}

fn run_search(
    params: &SearchParams,
    roots: &[(SourceKind, PathBuf)],
    store: &SessionStore,
) -> Result<JobOutput, String> {
    if roots.is_empty() {
        return Err("no search roots configured".to_string());
    }
    let candidates =
        search_tomograms(&params.search_basename, roots).map_err(|e| e.to_string())?;
    let count = candidates.len();

    let (added, skipped) = match &params.session {
        Some(session) => {
            let report = store
                .update(session, |s| {
                    s.add_entries(candidates.iter().map(|c| c.name.as_str()))
                })
                .map_err(|e| e.to_string())?;
            tracing::info!(
                session = %session,
                basename = %params.search_basename,
                added = report.added,
                skipped = report.skipped,
                "Search results added to session"
            );
            (Some(report.added), Some(report.skipped))
        }
        None => (None, None),
    };

    Ok(JobOutput::Search(SearchOutput {
        candidates,
        count,
        added,
        skipped,
    }))
}
