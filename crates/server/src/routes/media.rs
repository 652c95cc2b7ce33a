//! Derived media routes.
//!
//! Polling contract: a client asks for `/media/{type}/{tomo}` (or its
//! `/status`) and gets `pending` until the derivation job finishes. The first
//! poll for an unseen pair queues the job.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tomcat_core::validate_tomo_name;

use super::blocking;
use crate::error::{ApiError, ApiResult};
use crate::media::{MediaState, MediaStatus, MediaType, ProcessReport};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
struct ProcessRequest {
    /// Explicit tomograms to process.
    #[serde(default)]
    tomo_names: Vec<String>,
    /// Or every tomogram of this session.
    #[serde(default)]
    session: Option<String>,
}

/// Parse the path pair, refusing names that would leave the media directory.
fn media_key(media_type: &str, tomo_name: &str) -> ApiResult<MediaType> {
    let media_type = media_type.parse::<MediaType>().map_err(ApiError::BadRequest)?;
    validate_tomo_name(tomo_name)?;
    Ok(media_type)
}

/// GET /api/media/{type}/{tomo}/status
async fn media_status(
    State(state): State<Arc<AppState>>,
    Path((media_type, tomo)): Path<(String, String)>,
) -> ApiResult<Json<MediaStatus>> {
    let media_type = media_key(&media_type, &tomo)?;
    Ok(Json(state.media.status(media_type, &tomo)))
}

/// GET /api/media/{type}/{tomo} - The derived file once ready, `202` with the
/// status body while pending, `404` with the status body once failed.
async fn media_file(
    State(state): State<Arc<AppState>>,
    Path((media_type, tomo)): Path<(String, String)>,
) -> ApiResult<Response> {
    let media_type = media_key(&media_type, &tomo)?;
    let status = state.media.status(media_type, &tomo);

    match (status.status, &status.path) {
        (MediaState::Ready, Some(path)) => match tokio::fs::read(path).await {
            Ok(bytes) => Ok((
                [
                    (header::CONTENT_TYPE, media_type.content_type()),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                bytes,
            )
                .into_response()),
            Err(e) => {
                // Deleted from under us. Forget it and let the next poll rederive.
                tracing::warn!(path = %path.display(), error = %e, "Ready media file unreadable");
                state.media.invalidate(media_type, &tomo);
                Ok((StatusCode::ACCEPTED, Json(state.media.status(media_type, &tomo))).into_response())
            }
        },
        (MediaState::Failed, _) => Ok((StatusCode::NOT_FOUND, Json(status)).into_response()),
        _ => Ok((StatusCode::ACCEPTED, Json(status)).into_response()),
    }
}

/// POST /api/media/{type}/{tomo}/retry - Clear a failed pair and poll again.
async fn retry_media(
    State(state): State<Arc<AppState>>,
    Path((media_type, tomo)): Path<(String, String)>,
) -> ApiResult<Json<MediaStatus>> {
    let media_type = media_key(&media_type, &tomo)?;
    state.media.forget(media_type, &tomo);
    Ok(Json(state.media.status(media_type, &tomo)))
}

/// POST /api/media/process - Queue every configured media type for the named
/// tomograms (or a whole session).
async fn process_media(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProcessRequest>,
) -> ApiResult<Json<ProcessReport>> {
    let mut tomo_names = body.tomo_names;
    if let Some(session) = body.session {
        let store = Arc::clone(&state.store);
        let loaded = blocking(move || store.load(&session)).await?;
        tomo_names.extend(loaded.tomo_names().map(str::to_string));
    }
    if tomo_names.is_empty() {
        return Err(ApiError::BadRequest(
            "Provide tomo_names or a session".to_string(),
        ));
    }
    for name in &tomo_names {
        validate_tomo_name(name)?;
    }
    let mut seen = HashSet::new();
    tomo_names.retain(|name| seen.insert(name.clone()));

    Ok(Json(state.media.request_all(tomo_names.iter().map(String::as_str))))
}

/// Create the media routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media/process", post(process_media))
        .route("/media/{media_type}/{tomo}", get(media_file))
        .route("/media/{media_type}/{tomo}/status", get(media_status))
        .route("/media/{media_type}/{tomo}/retry", post(retry_media))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path as FsPath;
    use std::time::Duration;

    use image::{Rgb, RgbImage};
    use serde_json::json;
    use tomcat_core::{DataLayout, SourcePathsUpdate};

    use crate::jobs::JobRunner;
    use crate::media::ImageDeriver;
    use crate::routes::test_support::{send, send_json};
    use crate::state::tests::test_state;

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api", router()).with_state(state)
    }

    fn configure(state: &AppState, lowmag: Option<&FsPath>, tomogram: Option<&FsPath>) {
        state
            .settings
            .update(SourcePathsUpdate {
                lowmag_path: lowmag.map(|p| p.display().to_string()),
                tomogram_path: tomogram.map(|p| p.display().to_string()),
                ..Default::default()
            })
            .unwrap();
    }

    async fn poll_until_settled(state: Arc<AppState>, uri: &str) -> serde_json::Value {
        for _ in 0..500 {
            let (_, body) = send_json(app(state.clone()), "GET", uri, None).await;
            if body["status"] != "pending" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{uri} never left pending");
    }

    #[tokio::test]
    async fn test_lowmag_pending_then_ready() {
        let (tmp, state) = test_state();
        let root = tmp.path().join("lowmag");
        std::fs::create_dir_all(&root).unwrap();
        RgbImage::from_pixel(64, 64, Rgb([10, 20, 30]))
            .save(root.join("TS_01.png"))
            .unwrap();
        configure(&state, Some(&root), None);

        let (status, body) =
            send_json(app(state.clone()), "GET", "/api/media/lowmag/TS_01/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");

        let body = poll_until_settled(state.clone(), "/api/media/lowmag/TS_01/status").await;
        assert_eq!(body["status"], "ready");
        assert!(body["path"].as_str().unwrap().ends_with("lowmag.jpg"));

        let resp = tower::ServiceExt::oneshot(
            app(state),
            axum::http::Request::builder()
                .uri("/api/media/lowmag/TS_01")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
    }

    #[tokio::test]
    async fn test_missing_source_fails_and_file_route_404s() {
        let (tmp, state) = test_state();
        let root = tmp.path().join("lowmag");
        std::fs::create_dir_all(&root).unwrap();
        configure(&state, Some(&root), None);

        let body = poll_until_settled(state.clone(), "/api/media/lowmag/TS_09/status").await;
        assert_eq!(body["status"], "failed");
        assert!(body["error"].is_string());

        let (status, body) = send_json(app(state.clone()), "GET", "/api/media/lowmag/TS_09", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "failed");

        // A retry after the source appears succeeds.
        RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]))
            .save(root.join("TS_09.png"))
            .unwrap();
        let (status, _) = send_json(app(state.clone()), "POST", "/api/media/lowmag/TS_09/retry", None).await;
        assert_eq!(status, StatusCode::OK);
        let body = poll_until_settled(state, "/api/media/lowmag/TS_09/status").await;
        assert_eq!(body["status"], "ready");
    }

    #[tokio::test]
    async fn test_pending_file_request_is_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        // No free workers, so the job stays pending.
        let runner = JobRunner::new(1);
        let state = AppState::with_deriver(
            DataLayout::new(tmp.path().join("data")),
            runner,
            Arc::new(ImageDeriver),
        )
        .unwrap();
        let blocker = state.jobs.submit_task(
            crate::jobs::JobKind::Search,
            "blocker".into(),
            || {
                std::thread::sleep(Duration::from_millis(300));
                Err("done".into())
            },
        );

        let (status, body) = send_json(app(state.clone()), "GET", "/api/media/lowmag/TS_01", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "pending");
        assert!(body["job_id"].is_string());
        assert_ne!(body["job_id"], json!(blocker.to_string()));
    }

    #[tokio::test]
    async fn test_bad_type_and_traversal_rejected() {
        let (_tmp, state) = test_state();
        let (status, _) = send(app(state.clone()), "GET", "/api/media/movie/TS_01/status", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(app(state.clone()), "GET", "/api/media/thumbnail/../status", None).await;
        assert_ne!(status, StatusCode::OK);
        let (status, _) = send(app(state.clone()), "GET", "/api/media/thumbnail/a%2Fb/status", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(app(state), "GET", "/api/media/thumbnail/%2E%2E", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_process_session_counts() {
        let (tmp, state) = test_state();
        let root = tmp.path().join("tomos");
        std::fs::create_dir_all(&root).unwrap();
        configure(&state, None, Some(&root));
        state.store.create(Some("s")).unwrap();
        state
            .store
            .update("s.tomcat", |s| s.add_entries(["TS_01", "TS_02"]))
            .unwrap();

        let (status, body) =
            send_json(app(state.clone()), "POST", "/api/media/process", Some(json!({"session": "s.tomcat"}))).await;
        assert_eq!(status, StatusCode::OK);
        // Thumbnail and tomogram per tomo; low-mag and tilt-series roots are unset.
        assert_eq!(
            body["queued"].as_u64().unwrap()
                + body["failed"].as_u64().unwrap()
                + body["ready"].as_u64().unwrap(),
            4
        );
        assert_eq!(body["skipped"], 4);

        let (status, _) = send_json(app(state), "POST", "/api/media/process", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
