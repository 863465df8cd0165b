//! Store access shared by the session handlers and by other contexts that
//! need to read sessions and questions.

use pollroom_core::error::DomainError;
use pollroom_core::keys;
use pollroom_core::store::{self, KeyValueStore};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::aggregates::{Question, Session, SessionMeta, SessionState};

/// Loads a session's meta and state.
///
/// A session whose meta exists but whose state is gone is mid-deletion and
/// reads as closed.
///
/// # Errors
///
/// Returns `DomainError::SessionNotFound` if there is no such session, or
/// `DomainError::Store` if the read fails.
pub async fn load_session(
    store: &dyn KeyValueStore,
    session_id: Uuid,
) -> Result<Session, DomainError> {
    let meta: SessionMeta = store::load(store, &keys::session_meta(session_id))
        .await?
        .ok_or(DomainError::SessionNotFound(session_id))?;
    let state = load_state(store, session_id)
        .await?
        .map_or_else(|| SessionState::opened().deactivated(), |(state, _)| state);
    Ok(Session { meta, state })
}

/// Reads the session state together with its raw stored form, which is the
/// `expected` value for a subsequent compare-and-swap.
///
/// # Errors
///
/// Returns `DomainError::Store` if the read fails or the value is corrupt.
pub async fn load_state(
    store: &dyn KeyValueStore,
    session_id: Uuid,
) -> Result<Option<(SessionState, Value)>, DomainError> {
    let key = keys::session_state(session_id);
    let Some(raw) = store.get(&key).await? else {
        return Ok(None);
    };
    let state = store::decode(&key, raw.clone())?;
    Ok(Some((state, raw)))
}

/// Loads a question that must belong to `session_id`.
///
/// # Errors
///
/// Returns `DomainError::QuestionNotFound` if the question is missing, or
/// `DomainError::Store` if the read fails.
pub async fn load_question(
    store: &dyn KeyValueStore,
    session_id: Uuid,
    question_id: Uuid,
) -> Result<Question, DomainError> {
    store::load(store, &keys::question(session_id, question_id))
        .await?
        .ok_or(DomainError::QuestionNotFound {
            session_id,
            question_id,
        })
}
