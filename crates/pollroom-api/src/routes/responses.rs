//! Routes for participant answers and their aggregates.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use pollroom_responses::application::command_handlers;
use pollroom_responses::application::query_handlers::{ResultsView, get_results};
use pollroom_responses::domain::answers::AnswerPayload;
use pollroom_responses::domain::commands;
use pollroom_responses::domain::tally::Tally;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST .../responses.
#[derive(Debug, Deserialize)]
pub struct SubmitResponseRequest {
    /// Opaque participant token chosen by the client.
    pub participant_id: String,
    /// Name shown on results; defaults to "Anonymous".
    #[serde(default)]
    pub display_name: Option<String>,
    /// `{"choice": n}` for closed kinds, `{"text": "..."}` for open-ended.
    pub answer: AnswerPayload,
}

/// Response body for an accepted answer.
#[derive(Debug, Serialize)]
pub struct SubmitResponseResponse {
    /// The answered question.
    pub question_id: Uuid,
    /// The participant token.
    pub participant_id: String,
    /// Name recorded with the answer.
    pub display_name: String,
    /// When the answer was accepted.
    pub submitted_at: DateTime<Utc>,
}

/// POST /sessions/{session_id}/questions/{question_id}/responses
#[instrument(skip(state, request), fields(participant_id = %request.participant_id))]
async fn submit_response(
    State(state): State<AppState>,
    Path((session_id, question_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<SubmitResponseRequest>,
) -> Result<(StatusCode, Json<SubmitResponseResponse>), ApiError> {
    let command = commands::SubmitResponse {
        correlation_id: Uuid::new_v4(),
        session_id,
        question_id,
        participant_id: request.participant_id,
        display_name: request.display_name,
        payload: request.answer,
    };

    info!(correlation_id = %command.correlation_id, "handling submit_response command");

    let answer = command_handlers::handle_submit_response(
        &command,
        state.clock.as_ref(),
        state.store.as_ref(),
        &state.locks,
        state.repairs.as_ref(),
        state.max_answer_length,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponseResponse {
            question_id,
            participant_id: answer.participant_id,
            display_name: answer.display_name,
            submitted_at: answer.submitted_at,
        }),
    ))
}

/// DELETE /sessions/{session_id}/questions/{question_id}/responses/{participant_id}
#[instrument(skip(state))]
async fn delete_response(
    State(state): State<AppState>,
    Path((session_id, question_id, participant_id)): Path<(Uuid, Uuid, String)>,
) -> Result<StatusCode, ApiError> {
    let command = commands::DeleteResponse {
        correlation_id: Uuid::new_v4(),
        session_id,
        question_id,
        participant_id,
    };

    info!(correlation_id = %command.correlation_id, "handling delete_response command");

    command_handlers::handle_delete_response(
        &command,
        state.store.as_ref(),
        &state.locks,
        state.repairs.as_ref(),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /sessions/{session_id}/questions/{question_id}/results
#[instrument(skip(state))]
async fn results(
    State(state): State<AppState>,
    Path((session_id, question_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ResultsView>, ApiError> {
    let view = get_results(session_id, question_id, state.store.as_ref()).await?;
    Ok(Json(view))
}

/// POST /sessions/{session_id}/questions/{question_id}/resync
#[instrument(skip(state))]
async fn resync(
    State(state): State<AppState>,
    Path((session_id, question_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Tally>, ApiError> {
    let command = commands::ResyncTally {
        correlation_id: Uuid::new_v4(),
        session_id,
        question_id,
    };

    info!(correlation_id = %command.correlation_id, "handling resync_tally command");

    let tally =
        command_handlers::handle_resync_tally(&command, state.store.as_ref(), &state.locks).await?;
    Ok(Json(tally.without_zeros()))
}

/// Returns the router for answer routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/{session_id}/questions/{question_id}/responses",
            post(submit_response),
        )
        .route(
            "/{session_id}/questions/{question_id}/responses/{participant_id}",
            delete(delete_response),
        )
        .route("/{session_id}/questions/{question_id}/results", get(results))
        .route("/{session_id}/questions/{question_id}/resync", post(resync))
}
