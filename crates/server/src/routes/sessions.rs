//! Session and entry routes.
//!
//! Every mutation goes through [`SessionStore::update`](tomcat_core::SessionStore::update),
//! so concurrent edits of one session apply in arrival order and never drop
//! each other's fields.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tomcat_core::{
    AddOutcome, BulkReport, CatalogueError, Entry, EntryUpdate, Page, SessionSummary, UpsertOutcome,
    DEFAULT_PAGE_SIZE,
};

use super::blocking;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Largest page a client may ask for.
const MAX_PAGE_SIZE: usize = 500;
/// Session files are text tables; anything bigger is not one.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    name: Option<String>,
}

/// A session as returned by create and upload.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct SessionInfo {
    pub name: String,
    pub entry_count: usize,
}

#[derive(Debug, Deserialize)]
struct EntriesQuery {
    page: Option<usize>,
    per_page: Option<usize>,
    notes_query: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddEntryRequest {
    tomo_name: String,
}

#[derive(Debug, Serialize)]
pub struct AddEntryResponse {
    pub outcome: AddOutcome,
    pub entry: Entry,
}

#[derive(Debug, Serialize)]
pub struct UpsertResponse {
    pub outcome: UpsertOutcome,
    pub entry: Entry,
}

#[derive(Debug, Deserialize)]
struct BulkUpdateRequest {
    #[serde(default)]
    updates: Vec<EntryUpdate>,
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    #[serde(flatten)]
    pub report: BulkReport,
    pub saved_at: DateTime<Utc>,
}

/// GET /api/sessions - Session files, most recently modified first.
async fn list_sessions(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<SessionSummary>>> {
    let store = Arc::clone(&state.store);
    Ok(Json(blocking(move || store.list()).await?))
}

/// POST /api/sessions - Create an empty session.
async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<(StatusCode, Json<SessionInfo>)> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let store = Arc::clone(&state.store);
    let session = blocking(move || store.create(body.name.as_deref())).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionInfo {
            name: session.name().to_string(),
            entry_count: session.len(),
        }),
    ))
}

/// DELETE /api/sessions/{name}
async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    let store = Arc::clone(&state.store);
    blocking(move || store.delete(&name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/sessions/{name}/upload - Store a session file sent as the raw
/// request body. The name is sanitised; the stored name is returned.
async fn upload_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Json<SessionInfo>> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("Empty upload".to_string()));
    }
    let store = Arc::clone(&state.store);
    let session = blocking(move || store.import_upload(&name, &body)).await?;
    Ok(Json(SessionInfo {
        name: session.name().to_string(),
        entry_count: session.len(),
    }))
}

/// GET /api/sessions/{name}/entries?page&per_page&notes_query
async fn list_entries(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<EntriesQuery>,
) -> ApiResult<Json<Page>> {
    let page = query.page.unwrap_or(1);
    let per_page = query.per_page.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let notes_query = query.notes_query.unwrap_or_default();

    let store = Arc::clone(&state.store);
    let session = blocking(move || store.load(&name)).await?;
    Ok(Json(session.get_page(page, per_page, &notes_query)))
}

/// GET /api/sessions/{name}/entries/{tomo}
async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path((name, tomo)): Path<(String, String)>,
) -> ApiResult<Json<Entry>> {
    let store = Arc::clone(&state.store);
    let session = blocking(move || store.load(&name)).await?;
    session
        .get(&tomo)
        .cloned()
        .map(Json)
        .ok_or_else(|| {
            ApiError::from(CatalogueError::EntryNotFound {
                session: session.name().to_string(),
                tomo_name: tomo,
            })
        })
}

/// POST /api/sessions/{name}/entries - Add one tomogram. Adding a name that
/// is already present is not an error; the outcome says `skipped`.
async fn add_entry(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<AddEntryRequest>,
) -> ApiResult<Json<AddEntryResponse>> {
    let store = Arc::clone(&state.store);
    let response = blocking(move || {
        store.update(&name, |session| {
            let tomo_name = body.tomo_name.trim();
            let outcome = session.add_entry(tomo_name)?;
            let entry = session.get(tomo_name).cloned().unwrap_or_else(|| Entry::new(tomo_name));
            Ok(AddEntryResponse { outcome, entry })
        })
    })
    .await?;
    tracing::info!(tomo = %response.entry.tomo_name, outcome = ?response.outcome, "Add tomogram");
    Ok(Json(response))
}

/// PUT /api/sessions/{name}/entries/{tomo} - Partial upsert. The body names
/// only the fields to change; `null` clears thickness or score.
async fn upsert_entry(
    State(state): State<Arc<AppState>>,
    Path((name, tomo)): Path<(String, String)>,
    Json(mut update): Json<EntryUpdate>,
) -> ApiResult<Json<UpsertResponse>> {
    if !update.tomo_name.is_empty() && update.tomo_name != tomo {
        return Err(ApiError::BadRequest(format!(
            "Body names tomogram '{}' but the path names '{}'",
            update.tomo_name, tomo
        )));
    }
    update.tomo_name = tomo;

    let store = Arc::clone(&state.store);
    let response = blocking(move || {
        store.update(&name, |session| {
            let outcome = session.upsert(&update)?;
            let entry = session
                .get(&update.tomo_name)
                .cloned()
                .unwrap_or_else(|| Entry::new(update.tomo_name.clone()));
            Ok(UpsertResponse { outcome, entry })
        })
    })
    .await?;
    Ok(Json(response))
}

/// POST /api/sessions/{name}/entries/{tomo}/delete - Soft-delete marker.
async fn mark_for_deletion(
    State(state): State<Arc<AppState>>,
    Path((name, tomo)): Path<(String, String)>,
) -> ApiResult<Json<Entry>> {
    let store = Arc::clone(&state.store);
    let entry = blocking(move || {
        store.update(&name, |session| {
            session.mark_for_deletion(&tomo)?;
            Ok(session.get(&tomo).cloned().unwrap_or_else(|| Entry::new(tomo.clone())))
        })
    })
    .await?;
    tracing::info!(tomo = %entry.tomo_name, "Marked tomogram for deletion");
    Ok(Json(entry))
}

/// POST /api/sessions/{name}/autosave - Apply a batch of partial updates.
async fn autosave(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<BulkUpdateRequest>,
) -> ApiResult<Json<SaveResponse>> {
    let response = apply_updates(&state, name, body.updates).await?;
    tracing::debug!(updated = response.report.updated, "Autosave");
    Ok(Json(response))
}

/// POST /api/sessions/{name}/save - Explicit save. Same batch semantics as
/// autosave; an empty batch still rewrites the file.
async fn save(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<BulkUpdateRequest>,
) -> ApiResult<Json<SaveResponse>> {
    let response = apply_updates(&state, name.clone(), body.updates).await?;
    tracing::info!(
        session = %name,
        updated = response.report.updated,
        unchanged = response.report.unchanged,
        "Saved session"
    );
    Ok(Json(response))
}

async fn apply_updates(
    state: &AppState,
    name: String,
    updates: Vec<EntryUpdate>,
) -> ApiResult<SaveResponse> {
    let store = Arc::clone(&state.store);
    let report = blocking(move || store.apply_bulk(&name, &updates)).await?;
    Ok(SaveResponse {
        report,
        saved_at: Utc::now(),
    })
}

/// GET /api/sessions/{name}/download - The session file as stored.
async fn download_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let store = Arc::clone(&state.store);
    let file_name = name.clone();
    let bytes = blocking(move || store.read_raw(&name)).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Create the session routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{name}", axum::routing::delete(delete_session))
        .route(
            "/sessions/{name}/upload",
            put(upload_session).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/sessions/{name}/entries", get(list_entries).post(add_entry))
        .route("/sessions/{name}/entries/{tomo}", get(get_entry).put(upsert_entry))
        .route("/sessions/{name}/entries/{tomo}/delete", post(mark_for_deletion))
        .route("/sessions/{name}/autosave", post(autosave))
        .route("/sessions/{name}/save", post(save))
        .route("/sessions/{name}/download", get(download_session))
}
