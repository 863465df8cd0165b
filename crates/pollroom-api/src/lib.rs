//! Pollroom API: HTTP surface of the audience-response engine.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the full router: health at the root, everything else under
/// `/api/v1`.
pub fn app(state: AppState) -> Router {
    // TODO: Replace CorsLayer::permissive() with the moderator UI's origin once it is deployed.
    Router::new()
        .merge(routes::health::router())
        .nest(
            "/api/v1/sessions",
            routes::sessions::router()
                .merge(routes::questions::router())
                .merge(routes::responses::router())
                .merge(routes::live::router()),
        )
        .nest("/api/v1/join", routes::join::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
