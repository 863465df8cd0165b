//! Query handlers for the responses context.
//!
//! This module contains query handlers that read answers and counters and
//! return read-only view DTOs.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use pollroom_core::error::DomainError;
use pollroom_core::keys;
use pollroom_core::store::{self, KeyPath, KeyValueStore};
use pollroom_session::application::persistence::{load_question, load_session};
use pollroom_session::domain::aggregates::Question;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::answers::{AnswerPayload, ParticipantAnswer};
use crate::domain::leaderboard::{LeaderboardEntry, rank};
use crate::domain::tally::Tally;

/// One free-text answer as shown to the moderator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenAnswerView {
    /// Participant token.
    pub participant_id: String,
    /// Display name.
    pub display_name: String,
    /// The answer text.
    pub text: String,
    /// When it was accepted.
    pub submitted_at: DateTime<Utc>,
}

/// Current results of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultsView {
    /// Closed kinds: option counts (zeros omitted) and total.
    Tally {
        /// The question.
        question_id: Uuid,
        /// Count per option index.
        counts: BTreeMap<u32, i64>,
        /// Accepted answers.
        total: i64,
    },
    /// Open-ended questions: the answers, newest first.
    OpenEnded {
        /// The question.
        question_id: Uuid,
        /// The answers.
        answers: Vec<OpenAnswerView>,
    },
}

async fn load_answers(
    store: &dyn KeyValueStore,
    prefix: &KeyPath,
) -> Result<Vec<ParticipantAnswer>, DomainError> {
    store
        .list(prefix)
        .await?
        .into_iter()
        .map(|(key, value)| store::decode::<ParticipantAnswer>(&key, value))
        .collect::<Result<Vec<_>, _>>()
        .map_err(DomainError::from)
}

/// Retrieves the results of one question: the tally for closed kinds, the
/// answer list for open-ended ones.
///
/// # Errors
///
/// Returns `DomainError::SessionNotFound` or `DomainError::QuestionNotFound`
/// for unknown targets and `DomainError::Store` if a read fails.
pub async fn get_results(
    session_id: Uuid,
    question_id: Uuid,
    store: &dyn KeyValueStore,
) -> Result<ResultsView, DomainError> {
    load_session(store, session_id).await?;
    let question = load_question(store, session_id, question_id).await?;

    if question.kind.is_closed() {
        let counters = store.list(&keys::question_tally(session_id, question_id)).await?;
        let tally = Tally::from_counters(counters)?.without_zeros();
        return Ok(ResultsView::Tally {
            question_id,
            counts: tally.counts,
            total: tally.total,
        });
    }

    let mut answers = load_answers(store, &keys::question_answers(session_id, question_id)).await?;
    answers.sort_by(|a, b| {
        b.submitted_at
            .cmp(&a.submitted_at)
            .then_with(|| a.participant_id.cmp(&b.participant_id))
    });
    let answers = answers
        .into_iter()
        .filter_map(|answer| match answer.payload {
            AnswerPayload::Text(text) => Some(OpenAnswerView {
                participant_id: answer.participant_id,
                display_name: answer.display_name,
                text,
                submitted_at: answer.submitted_at,
            }),
            AnswerPayload::Choice(_) => None,
        })
        .collect();
    Ok(ResultsView::OpenEnded {
        question_id,
        answers,
    })
}

/// Ranks the session's participants by correct multiple-choice answers.
///
/// # Errors
///
/// Returns `DomainError::SessionNotFound` for an unknown session and
/// `DomainError::Store` if a read fails.
pub async fn get_leaderboard(
    session_id: Uuid,
    store: &dyn KeyValueStore,
) -> Result<Vec<LeaderboardEntry>, DomainError> {
    load_session(store, session_id).await?;

    let questions: HashMap<Uuid, Question> = store
        .list(&keys::questions(session_id))
        .await?
        .into_iter()
        .map(|(key, value)| {
            store::decode::<Question>(&key, value).map(|question| (question.id, question))
        })
        .collect::<Result<_, _>>()?;
    let answers = load_answers(store, &keys::answers(session_id)).await?;

    Ok(rank(answers, &questions))
}
