//! Participant entry: resolving a join code to a session.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::instrument;

use pollroom_session::application::query_handlers::{JoinedSession, resolve_code};

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /join.
#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    /// The code as typed; case and surrounding whitespace are ignored.
    pub code: String,
}

/// POST /join
#[instrument(skip(state, request), fields(code = %request.code))]
async fn join(
    State(state): State<AppState>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<JoinedSession>, ApiError> {
    let joined = resolve_code(&request.code, state.store.as_ref()).await?;
    Ok(Json(joined))
}

/// Returns the router for joining.
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(join))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::StatusCode;
    use tower::ServiceExt;

    use crate::routes::sessions;
    use crate::routes::test_support::{body_json, json_request, test_app_state};

    #[tokio::test]
    async fn test_join_accepts_lowercase_code() {
        // Arrange
        let state = test_app_state();
        let created = sessions::router()
            .with_state(state.clone())
            .oneshot(json_request("POST", "/", &serde_json::json!({ "title": "Trivia" })))
            .await
            .unwrap();
        let session_id = body_json(created).await["session_id"].clone();

        // Act
        let response = router()
            .with_state(state)
            .oneshot(json_request("POST", "/", &serde_json::json!({ "code": " abcdef " })))
            .await
            .unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["session_id"], session_id);
        assert_eq!(json["title"], "Trivia");
    }

    #[tokio::test]
    async fn test_join_with_unknown_code_returns_404() {
        let app = router().with_state(test_app_state());

        let response = app
            .oneshot(json_request("POST", "/", &serde_json::json!({ "code": "ZZZZZZ" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "invalid_code");
    }
}
