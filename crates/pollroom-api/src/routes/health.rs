//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use pollroom_core::keys;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the store does not answer.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Sessions with at least one live subscriber on this node.
    pub watched_sessions: usize,
}

/// GET /health
///
/// Checks the store with a point read of a key that never exists.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = match state.store.get(&keys::session_meta(Uuid::nil())).await {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(e) => {
            warn!(error = %e, "health check could not reach the store");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };
    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            watched_sessions: state.feed.watched_sessions(),
        }),
    )
}

/// Returns the health check router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
