// crates/server/src/routes/jobs.rs
//! API routes for background jobs.
//!
//! - POST /sessions/{name}/search — Queue a search-and-add job
//! - POST /search — Queue a search that only reports candidates
//! - POST /jobs — Submit any job from tagged parameters
//! - GET /jobs — List pending and running jobs
//! - GET /jobs/{id} — Poll one job

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tomcat_core::validate_tomo_name;

use super::blocking;
use crate::error::{ApiError, ApiResult};
use crate::jobs::{JobId, JobParams, JobSnapshot, SearchParams};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct SearchRequest {
    search_basename: String,
    #[serde(default)]
    search_root_paths: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobAccepted {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
struct JobNotFound {
    status: &'static str,
}

impl SearchRequest {
    fn into_params(self, session: Option<String>) -> ApiResult<JobParams> {
        let search_basename = self.search_basename.trim().to_string();
        if search_basename.is_empty() {
            return Err(ApiError::BadRequest("search_basename is required".to_string()));
        }
        Ok(JobParams::Search(SearchParams {
            session,
            search_basename,
            search_root_paths: self.search_root_paths,
        }))
    }
}

/// POST /api/sessions/{name}/search — Search the source roots and add every
/// match to the session. Returns at once with the job id to poll.
async fn search_into_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<SearchRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    // Unknown sessions fail here rather than inside the job.
    let store = Arc::clone(&state.store);
    let session = name.clone();
    blocking(move || store.load(&session)).await?;

    let params = body.into_params(Some(name))?;
    Ok(submit(&state, params))
}

/// POST /api/search — Search without touching any session.
async fn search_only(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SearchRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let params = body.into_params(None)?;
    Ok(submit(&state, params))
}

fn submit(state: &AppState, params: JobParams) -> (StatusCode, Json<JobAccepted>) {
    let job_id = state.dispatcher.submit(params);
    (StatusCode::ACCEPTED, Json(JobAccepted { job_id }))
}

/// POST /api/jobs — Submit a job from its tagged parameters, e.g.
/// `{"kind": "media", "media_type": "thumbnail", "tomo_name": "TS_01"}`.
/// A matching unfinished job is joined rather than duplicated.
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(params): Json<JobParams>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    match &params {
        JobParams::Search(search) if search.search_basename.trim().is_empty() => {
            return Err(ApiError::BadRequest("search_basename is required".to_string()));
        }
        JobParams::Media(media) => validate_tomo_name(&media.tomo_name)?,
        JobParams::Search(_) => {}
    }
    Ok(submit(&state, params))
}

/// GET /api/jobs — Pending and running jobs, oldest first.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSnapshot>> {
    Json(state.jobs.active_jobs())
}

/// GET /api/jobs/{id} — One job. Unknown, expired and malformed ids all
/// answer 404 `{"status": "not_found"}`.
async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match id.parse::<JobId>().ok().and_then(|id| state.jobs.status(id)) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::NOT_FOUND, Json(JobNotFound { status: "not_found" })).into_response(),
    }
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions/{name}/search", post(search_into_session))
        .route("/search", post(search_only))
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/{id}", get(get_job))
}
