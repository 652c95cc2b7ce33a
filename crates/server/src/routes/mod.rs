//! API route handlers for the TomCat server.

pub mod archive;
pub mod health;
pub mod jobs;
pub mod media;
pub mod sessions;
pub mod settings;

use std::sync::Arc;

use axum::Router;
use tomcat_core::CatalogueError;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health - Health check
/// - GET  /api/settings, PUT /api/settings - Source roots
/// - GET  /api/sessions - List session files
/// - POST /api/sessions - Create a session
/// - DELETE /api/sessions/{name} - Delete a session
/// - PUT  /api/sessions/{name}/upload - Store an uploaded session file
/// - GET  /api/sessions/{name}/entries - Paginated, notes-filtered entries
/// - POST /api/sessions/{name}/entries - Add one tomogram
/// - GET  /api/sessions/{name}/entries/{tomo} - One entry
/// - PUT  /api/sessions/{name}/entries/{tomo} - Upsert one entry
/// - POST /api/sessions/{name}/entries/{tomo}/delete - Mark for deletion
/// - POST /api/sessions/{name}/autosave, /save - Apply a batch of updates
/// - GET  /api/sessions/{name}/download - Raw session file
/// - GET  /api/sessions/{name}/export - Session + media archive
/// - POST /api/archives/import - Restore an archive
/// - POST /api/sessions/{name}/search - Queue a search-and-add job
/// - GET  /api/jobs, GET /api/jobs/{id} - Job polling
/// - GET  /api/media/{type}/{tomo}/status - Media readiness
/// - GET  /api/media/{type}/{tomo} - Derived file, or 202 while pending
/// - POST /api/media/process - Queue derivation for many tomograms
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", settings::router())
        .nest("/api", sessions::router())
        .nest("/api", archive::router())
        .nest("/api", jobs::router())
        .nest("/api", media::router())
        .with_state(state)
}

/// Run filesystem-bound store work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, CatalogueError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("Blocking task failed: {e}")))?
        .map_err(ApiError::from)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;

    #[tokio::test]
    async fn test_api_routes_creation() {
        let (_tmp, state) = test_state();
        let _router = api_routes(state);
    }

    #[tokio::test]
    async fn test_blocking_maps_catalogue_errors() {
        let err = blocking(|| -> Result<(), CatalogueError> {
            Err(CatalogueError::validation("bad"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Catalogue(CatalogueError::Validation(_))));
    }
}
