//! Routes for authoring and presenting questions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use pollroom_session::application::command_handlers::{self, PublishOutcome};
use pollroom_session::application::query_handlers::{self, QuestionView};
use pollroom_session::domain::aggregates::QuestionKind;
use pollroom_session::domain::commands;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /sessions/{session_id}/questions.
#[derive(Debug, Deserialize)]
pub struct CreateQuestionRequest {
    /// Question kind.
    pub kind: QuestionKind,
    /// Prompt text.
    pub text: String,
    /// Option labels; omit for open-ended questions.
    #[serde(default)]
    pub options: Vec<String>,
    /// Index of the correct option; multiple-choice only.
    #[serde(default)]
    pub correct_index: Option<u32>,
}

/// Response body for a newly created question.
#[derive(Debug, Serialize)]
pub struct CreateQuestionResponse {
    /// The new question.
    pub question_id: Uuid,
}

/// Response body for a publish request.
#[derive(Debug, Serialize)]
pub struct PublishResponse {
    /// The question now live.
    pub question_id: Uuid,
    /// True if the question was already live and nothing changed.
    pub already_live: bool,
}

/// POST /sessions/{session_id}/questions
#[instrument(skip(state, request), fields(kind = ?request.kind))]
async fn create_question(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<CreateQuestionRequest>,
) -> Result<(StatusCode, Json<CreateQuestionResponse>), ApiError> {
    let command = commands::CreateQuestion {
        correlation_id: Uuid::new_v4(),
        session_id,
        kind: request.kind,
        text: request.text,
        options: request.options,
        correct_index: request.correct_index,
    };

    info!(correlation_id = %command.correlation_id, "handling create_question command");

    let question = command_handlers::handle_create_question(
        &command,
        state.clock.as_ref(),
        state.ids.as_ref(),
        state.store.as_ref(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateQuestionResponse {
            question_id: question.id,
        }),
    ))
}

/// GET /sessions/{session_id}/questions
#[instrument(skip(state))]
async fn list_questions(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<QuestionView>>, ApiError> {
    let questions = query_handlers::list_questions(session_id, state.store.as_ref()).await?;
    Ok(Json(questions))
}

/// GET /sessions/{session_id}/questions/{question_id}
#[instrument(skip(state))]
async fn get_question(
    State(state): State<AppState>,
    Path((session_id, question_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<QuestionView>, ApiError> {
    let question =
        query_handlers::get_question(session_id, question_id, state.store.as_ref()).await?;
    Ok(Json(question))
}

/// POST /sessions/{session_id}/questions/{question_id}/publish
#[instrument(skip(state))]
async fn publish_question(
    State(state): State<AppState>,
    Path((session_id, question_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PublishResponse>, ApiError> {
    let command = commands::PublishQuestion {
        correlation_id: Uuid::new_v4(),
        session_id,
        question_id,
    };

    info!(correlation_id = %command.correlation_id, "handling publish_question command");

    let outcome = command_handlers::handle_publish_question(&command, state.store.as_ref()).await?;

    Ok(Json(PublishResponse {
        question_id,
        already_live: outcome == PublishOutcome::AlreadyLive,
    }))
}

/// Returns the router for question routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/{session_id}/questions",
            post(create_question).get(list_questions),
        )
        .route("/{session_id}/questions/{question_id}", get(get_question))
        .route(
            "/{session_id}/questions/{question_id}/publish",
            post(publish_question),
        )
}
