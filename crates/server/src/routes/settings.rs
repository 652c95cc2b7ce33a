//! Source directory settings routes.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use tomcat_core::{SourcePaths, SourcePathsUpdate};

use super::blocking;
use crate::{error::ApiResult, state::AppState};

/// GET /api/settings - Current source roots.
async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SourcePaths> {
    Json(state.settings.paths())
}

/// PUT /api/settings - Update source roots (partial). Omitted fields keep
/// their value; an empty string clears a root.
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SourcePathsUpdate>,
) -> ApiResult<Json<SourcePaths>> {
    let settings = Arc::clone(&state.settings);
    let paths = blocking(move || settings.update(body)).await?;
    tracing::info!(
        tomogram = %paths.tomogram_path,
        tiltseries = %paths.tiltseries_path,
        lowmag = %paths.lowmag_path,
        "Updated source roots"
    );
    Ok(Json(paths))
}

/// Create the settings routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/settings", get(get_settings).put(update_settings))
}
