// crates/server/src/lib.rs
//! TomCat server library.
//!
//! Axum HTTP server for the tomography catalogue: session editing, source
//! search jobs and derived media polling over a JSON API.

pub mod error;
pub mod jobs;
pub mod media;
pub mod routes;
pub mod state;

pub use error::*;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes under `/api`
/// - CORS for the browser front-end (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================
