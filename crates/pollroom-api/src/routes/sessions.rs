//! Routes for the moderator's side of a session.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use pollroom_responses::application::query_handlers::get_leaderboard;
use pollroom_responses::domain::leaderboard::LeaderboardEntry;
use pollroom_session::application::command_handlers;
use pollroom_session::application::query_handlers::{self, SessionView};
use pollroom_session::domain::commands;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /sessions.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Session title shown to participants.
    pub title: String,
}

/// Response body for a newly created session.
#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    /// The new session.
    pub session_id: Uuid,
    /// Code participants join with.
    pub code: String,
}

/// POST /sessions
#[instrument(skip(state, request))]
async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let command = commands::CreateSession {
        correlation_id: Uuid::new_v4(),
        title: request.title,
    };

    info!(correlation_id = %command.correlation_id, "handling create_session command");

    let created = command_handlers::handle_create_session(
        &command,
        state.clock.as_ref(),
        &state.rng,
        state.ids.as_ref(),
        state.store.as_ref(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: created.session_id,
            code: created.code.to_string(),
        }),
    ))
}

/// GET /sessions
#[instrument(skip(state))]
async fn list_sessions(State(state): State<AppState>) -> Result<Json<Vec<SessionView>>, ApiError> {
    let sessions = query_handlers::list_sessions(state.store.as_ref()).await?;
    Ok(Json(sessions))
}

/// GET /sessions/{session_id}
#[instrument(skip(state))]
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let view = query_handlers::get_session(session_id, state.store.as_ref()).await?;
    Ok(Json(view))
}

/// POST /sessions/{session_id}/close
#[instrument(skip(state))]
async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let command = commands::CloseSession {
        correlation_id: Uuid::new_v4(),
        session_id,
    };

    info!(correlation_id = %command.correlation_id, "handling close_session command");

    command_handlers::handle_close_session(&command, state.store.as_ref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /sessions/{session_id}
#[instrument(skip(state))]
async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let command = commands::DeleteSession {
        correlation_id: Uuid::new_v4(),
        session_id,
    };

    info!(correlation_id = %command.correlation_id, "handling delete_session command");

    command_handlers::handle_delete_session(&command, state.store.as_ref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /sessions/{session_id}/leaderboard
#[instrument(skip(state))]
async fn leaderboard(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let entries = get_leaderboard(session_id, state.store.as_ref()).await?;
    Ok(Json(entries))
}

/// Returns the router for session lifecycle routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session).get(list_sessions))
        .route("/{session_id}", get(get_session).delete(delete_session))
        .route("/{session_id}/close", post(close_session))
        .route("/{session_id}/leaderboard", get(leaderboard))
}
