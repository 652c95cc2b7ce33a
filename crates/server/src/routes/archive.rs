//! Session archive export and import.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tomcat_core::{export_archive, import_archive, ImportReport};

use super::blocking;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Archives carry derived media, so they outgrow axum's default body limit.
const MAX_ARCHIVE_BYTES: usize = 512 * 1024 * 1024;

/// GET /api/sessions/{name}/export - Zip of the session file plus its media.
async fn export_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let store = Arc::clone(&state.store);
    let media_dir = state.layout.media_dir();
    let file_name = archive_file_name(&name);
    let bytes = blocking(move || export_archive(&store, &name, &media_dir)).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// POST /api/archives/import - Restore an exported archive sent as the raw
/// request body. Nothing is written unless the whole archive is valid.
async fn import(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<Json<ImportReport>> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("Empty archive".to_string()));
    }
    let store = Arc::clone(&state.store);
    let media_dir = state.layout.media_dir();
    let report = blocking(move || import_archive(&body, &store, &media_dir)).await?;
    Ok(Json(report))
}

/// `<session stem>_<timestamp>.zip`
fn archive_file_name(session_name: &str) -> String {
    let stem = FsPath::new(session_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("session");
    format!("{stem}_{}.zip", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// Create the archive routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions/{name}/export", get(export_session))
        .route(
            "/archives/import",
            post(import).layer(DefaultBodyLimit::max(MAX_ARCHIVE_BYTES)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tomcat_core::EntryUpdate;
    use tower::ServiceExt;

    use crate::routes::test_support::send;
    use crate::state::tests::test_state;

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api", router()).with_state(state)
    }

    async fn post_archive(app: Router, bytes: Vec<u8>) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/archives/import")
                    .header("content-type", "application/zip")
                    .body(Body::from(bytes))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_archive_file_name() {
        let name = archive_file_name("grid_3.tomcat");
        assert!(name.starts_with("grid_3_"));
        assert!(name.ends_with(".zip"));
    }

    #[tokio::test]
    async fn test_export_then_import_into_fresh_state() {
        let (_tmp, source) = test_state();
        source.store.create(Some("grid")).unwrap();
        source
            .store
            .update("grid.tomcat", |s| s.upsert(&EntryUpdate::new("TS_01").score(Some(4))))
            .unwrap();
        let media = source.layout.media_dir().join("TS_01");
        std::fs::create_dir_all(&media).unwrap();
        std::fs::write(media.join("thumbnail.jpg"), b"jpeg").unwrap();

        let resp = app(source)
            .oneshot(
                Request::builder()
                    .uri("/api/sessions/grid.tomcat/export")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/zip");
        let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains("grid_"));
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec();

        let (_tmp2, target) = test_state();
        let (status, body) = post_archive(app(target.clone()), bytes).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session"], "grid.tomcat");
        assert_eq!(body["entry_count"], 1);
        assert_eq!(body["media_files"], 1);

        let restored = target.store.load("grid.tomcat").unwrap();
        assert_eq!(restored.get("TS_01").unwrap().score, Some(4));
        assert!(target.layout.media_dir().join("TS_01/thumbnail.jpg").is_file());
    }

    #[tokio::test]
    async fn test_import_garbage_is_bad_request() {
        let (_tmp, state) = test_state();
        let (status, body) = post_archive(app(state.clone()), b"not a zip".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation error");
        assert!(state.store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_unknown_session_is_404() {
        let (_tmp, state) = test_state();
        let (status, _) = send(app(state), "GET", "/api/sessions/nope.tomcat/export", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
