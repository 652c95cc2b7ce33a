// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use tomcat_core::{CatalogueError, DataLayout, SessionStore, SettingsStore};

use crate::jobs::{JobDispatcher, JobRunner};
use crate::media::{ImageDeriver, MediaDeriver, MediaTracker};

/// Shared application state accessible from all route handlers.
///
/// Each component is constructed once here and shared by `Arc`; nothing in
/// the crate reaches for a global.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Where sessions, media and config live.
    pub layout: DataLayout,
    /// Source directory settings (`config.json`).
    pub settings: Arc<SettingsStore>,
    /// Session files in the uploads directory.
    pub store: Arc<SessionStore>,
    /// Background job runner for search and media derivation.
    pub jobs: Arc<JobRunner>,
    /// Derived media readiness.
    pub media: Arc<MediaTracker>,
    /// Builds job bodies from request parameters.
    pub dispatcher: JobDispatcher,
}

impl AppState {
    /// Build state over `layout` with the default raster deriver.
    pub fn new(layout: DataLayout, workers: usize) -> Result<Arc<Self>, CatalogueError> {
        Self::with_deriver(layout, JobRunner::new(workers), Arc::new(ImageDeriver))
    }

    /// Build state with an explicit runner and deriver (tests, alternate
    /// derivation engines).
    pub fn with_deriver(
        layout: DataLayout,
        runner: JobRunner,
        deriver: Arc<dyn MediaDeriver>,
    ) -> Result<Arc<Self>, CatalogueError> {
        layout.ensure()?;
        let settings = Arc::new(SettingsStore::load(layout.config_file())?);
        let store = Arc::new(SessionStore::open(layout.uploads_dir())?);
        let jobs = Arc::new(runner);
        let media = Arc::new(MediaTracker::new(
            Arc::clone(&jobs),
            Arc::clone(&settings),
            layout.media_dir(),
            deriver,
        ));
        let dispatcher = JobDispatcher::new(
            Arc::clone(&jobs),
            Arc::clone(&store),
            Arc::clone(&settings),
            Arc::clone(&media),
        );

        Ok(Arc::new(Self {
            start_time: Instant::now(),
            layout,
            settings,
            store,
            jobs,
            media,
            dispatcher,
        }))
    }

    /// Seconds since the server started.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
