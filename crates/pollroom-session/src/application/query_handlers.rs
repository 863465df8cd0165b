//! Query handlers for the session context.
//!
//! These read the store and return read-only view DTOs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pollroom_core::error::{DomainError, StoreError};
use pollroom_core::keys;
use pollroom_core::store::{self, KeyValueStore};
use serde::Serialize;
use uuid::Uuid;

use crate::application::persistence::{load_question, load_session};
use crate::domain::aggregates::{Question, QuestionKind, Session, SessionMeta, SessionState};
use crate::domain::codes::JoinCode;

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    /// The session identifier.
    pub session_id: Uuid,
    /// Join code.
    pub code: String,
    /// Title.
    pub title: String,
    /// Lifecycle phase: `open`, `question_live` or `closed`.
    pub status: &'static str,
    /// Whether the session still accepts answers.
    pub active: bool,
    /// The live question, if any.
    pub current_question_id: Option<Uuid>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.meta.id,
            code: session.meta.code.to_string(),
            title: session.meta.title.clone(),
            status: session.state.lifecycle().as_str(),
            active: session.state.active,
            current_question_id: session.state.current_question_id,
            created_at: session.meta.created_at,
        }
    }
}

/// What a participant learns by joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinedSession {
    /// The session behind the code.
    pub session_id: Uuid,
    /// Its title.
    pub title: String,
}

/// Read-only view of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    /// The question identifier.
    pub question_id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Question kind.
    pub kind: QuestionKind,
    /// Prompt.
    pub text: String,
    /// Option labels.
    pub options: Vec<String>,
    /// Correct option, multiple-choice only.
    pub correct_index: Option<u32>,
    /// Whether the question has ever been presented.
    pub published: bool,
    /// Whether the question is the session's live one right now.
    pub live: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl QuestionView {
    fn new(question: Question, state: &SessionState) -> Self {
        Self {
            live: state.active && state.current_question_id == Some(question.id),
            question_id: question.id,
            session_id: question.session_id,
            kind: question.kind,
            text: question.text,
            options: question.options,
            correct_index: question.correct_index,
            published: question.published,
            created_at: question.created_at,
        }
    }
}

/// Retrieves a session by its identifier.
///
/// # Errors
///
/// Returns `DomainError::SessionNotFound` if the session does not exist.
pub async fn get_session(
    session_id: Uuid,
    store: &dyn KeyValueStore,
) -> Result<SessionView, DomainError> {
    let session = load_session(store, session_id).await?;
    Ok(SessionView::from(&session))
}

/// Lists every session, newest first.
///
/// # Errors
///
/// Returns `DomainError::Store` if the listing fails or a record is corrupt.
pub async fn list_sessions(store: &dyn KeyValueStore) -> Result<Vec<SessionView>, DomainError> {
    let mut metas: Vec<SessionMeta> = Vec::new();
    let mut states: HashMap<Uuid, SessionState> = HashMap::new();

    for (key, value) in store.list(&keys::sessions()).await? {
        match key.segments().nth(2) {
            Some("meta") => metas.push(store::decode(&key, value)?),
            Some("state") => {
                let state: SessionState = store::decode(&key, value)?;
                if let Some(id) = key.segments().nth(1).and_then(|s| s.parse().ok()) {
                    states.insert(id, state);
                }
            }
            _ => {}
        }
    }

    let mut sessions: Vec<Session> = metas
        .into_iter()
        .map(|meta| {
            let state = states
                .remove(&meta.id)
                .unwrap_or_else(|| SessionState::opened().deactivated());
            Session { meta, state }
        })
        .collect();
    sessions.sort_by(|a, b| {
        b.meta
            .created_at
            .cmp(&a.meta.created_at)
            .then_with(|| b.meta.id.cmp(&a.meta.id))
    });
    Ok(sessions.iter().map(SessionView::from).collect())
}

/// Resolves a join code typed by a participant.
///
/// # Errors
///
/// Returns `DomainError::InvalidCode` if the code is malformed or unmapped,
/// and `DomainError::SessionInactive` if it maps to a session that is gone,
/// closed or being deleted.
pub async fn resolve_code(
    raw_code: &str,
    store: &dyn KeyValueStore,
) -> Result<JoinedSession, DomainError> {
    let code = JoinCode::normalize(raw_code)?;
    let code_key = keys::code(code.as_str());
    let session_id: Uuid = match store::load::<String>(store, &code_key).await? {
        None => return Err(DomainError::InvalidCode(code.to_string())),
        Some(raw) => raw.parse().map_err(|e: uuid::Error| StoreError::Corrupt {
            key: code_key.to_string(),
            reason: e.to_string(),
        })?,
    };

    match load_session(store, session_id).await {
        Ok(session) if session.state.active => Ok(JoinedSession {
            session_id,
            title: session.meta.title,
        }),
        Ok(_) | Err(DomainError::SessionNotFound(_)) => {
            Err(DomainError::SessionInactive(session_id))
        }
        Err(e) => Err(e),
    }
}

/// Lists a session's questions in creation order.
///
/// # Errors
///
/// Returns `DomainError::SessionNotFound` if the session does not exist.
pub async fn list_questions(
    session_id: Uuid,
    store: &dyn KeyValueStore,
) -> Result<Vec<QuestionView>, DomainError> {
    let session = load_session(store, session_id).await?;
    let mut questions = store
        .list(&keys::questions(session_id))
        .await?
        .into_iter()
        .map(|(key, value)| store::decode::<Question>(&key, value))
        .collect::<Result<Vec<_>, _>>()?;
    questions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(questions
        .into_iter()
        .map(|question| QuestionView::new(question, &session.state))
        .collect())
}

/// Retrieves one question of a session.
///
/// # Errors
///
/// Returns `DomainError::SessionNotFound` or `DomainError::QuestionNotFound`.
pub async fn get_question(
    session_id: Uuid,
    question_id: Uuid,
    store: &dyn KeyValueStore,
) -> Result<QuestionView, DomainError> {
    let session = load_session(store, session_id).await?;
    let question = load_question(store, session_id, question_id).await?;
    Ok(QuestionView::new(question, &session.state))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Duration;
    use pollroom_core::error::DomainError;
    use pollroom_core::keys;
    use pollroom_core::rng::DeterministicRng;
    use pollroom_core::store::KeyValueStore;
    use pollroom_store::MemoryStore;
    use pollroom_test_support::{FixedClock, SequenceRng, SequentialIds, fixed_time};
    use uuid::Uuid;

    use super::*;
    use crate::application::command_handlers::{
        SessionCreated, handle_close_session, handle_create_question, handle_create_session,
        handle_delete_session, handle_publish_question,
    };
    use crate::domain::commands::{
        CloseSession, CreateQuestion, CreateSession, DeleteSession, PublishQuestion,
    };

    struct Fixture {
        clock: FixedClock,
        rng: Mutex<SequenceRng>,
        ids: SequentialIds,
        store: MemoryStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                clock: FixedClock::stepping(fixed_time(), Duration::seconds(1)),
                rng: Mutex::new(SequenceRng::new((0..32).collect())),
                ids: SequentialIds::new(),
                store: MemoryStore::new(),
            }
        }

        async fn session(&self, title: &str) -> SessionCreated {
            let rng: &Mutex<dyn DeterministicRng + Send> = &self.rng;
            handle_create_session(
                &CreateSession {
                    correlation_id: Uuid::new_v4(),
                    title: title.into(),
                },
                &self.clock,
                rng,
                &self.ids,
                &self.store,
            )
            .await
            .unwrap()
        }

        async fn poll(&self, session_id: Uuid, text: &str) -> Uuid {
            handle_create_question(
                &CreateQuestion {
                    correlation_id: Uuid::new_v4(),
                    session_id,
                    kind: QuestionKind::Poll,
                    text: text.into(),
                    options: vec!["Yes".into(), "No".into()],
                    correct_index: None,
                },
                &self.clock,
                &self.ids,
                &self.store,
            )
            .await
            .unwrap()
            .id
        }
    }

    #[tokio::test]
    async fn test_get_session_reports_lifecycle() {
        // Arrange
        let fx = Fixture::new();
        let created = fx.session("Standup").await;
        let question_id = fx.poll(created.session_id, "Blocked?").await;
        handle_publish_question(
            &PublishQuestion {
                correlation_id: Uuid::new_v4(),
                session_id: created.session_id,
                question_id,
            },
            &fx.store,
        )
        .await
        .unwrap();

        // Act
        let view = get_session(created.session_id, &fx.store).await.unwrap();

        // Assert
        assert_eq!(view.code, created.code.to_string());
        assert_eq!(view.title, "Standup");
        assert_eq!(view.status, "question_live");
        assert_eq!(view.current_question_id, Some(question_id));
        assert_eq!(view.created_at, fixed_time());
    }

    #[tokio::test]
    async fn test_get_session_unknown_id_is_not_found() {
        let result = get_session(Uuid::new_v4(), &MemoryStore::new()).await;
        assert!(matches!(result, Err(DomainError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_sessions_newest_first() {
        // Arrange
        let fx = Fixture::new();
        let older = fx.session("Older").await;
        let newer = fx.session("Newer").await;
        handle_close_session(
            &CloseSession {
                correlation_id: Uuid::new_v4(),
                session_id: older.session_id,
            },
            &fx.store,
        )
        .await
        .unwrap();

        // Act
        let listed = list_sessions(&fx.store).await.unwrap();

        // Assert
        let ids: Vec<Uuid> = listed.iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec![newer.session_id, older.session_id]);
        assert_eq!(listed[1].status, "closed");
    }

    #[tokio::test]
    async fn test_resolve_code_normalizes_input() {
        // Arrange
        let fx = Fixture::new();
        let created = fx.session("Quiz night").await;
        let typed = format!("  {} ", created.code.as_str().to_ascii_lowercase());

        // Act
        let joined = resolve_code(&typed, &fx.store).await.unwrap();

        // Assert
        assert_eq!(
            joined,
            JoinedSession {
                session_id: created.session_id,
                title: "Quiz night".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_code_errors() {
        // Arrange
        let fx = Fixture::new();
        let closed = fx.session("Closed").await;
        handle_close_session(
            &CloseSession {
                correlation_id: Uuid::new_v4(),
                session_id: closed.session_id,
            },
            &fx.store,
        )
        .await
        .unwrap();

        // Act
        let malformed = resolve_code("nope", &fx.store).await;
        let unmapped = resolve_code("ZZZZZZ", &fx.store).await;
        let inactive = resolve_code(closed.code.as_str(), &fx.store).await;

        // Assert
        assert!(matches!(malformed, Err(DomainError::InvalidCode(_))));
        assert!(matches!(unmapped, Err(DomainError::InvalidCode(c)) if c == "ZZZZZZ"));
        assert!(matches!(inactive, Err(DomainError::SessionInactive(id)) if id == closed.session_id));
    }

    #[tokio::test]
    async fn test_deleted_session_code_becomes_invalid() {
        // Arrange
        let fx = Fixture::new();
        let created = fx.session("Ephemeral").await;

        // Act
        handle_delete_session(
            &DeleteSession {
                correlation_id: Uuid::new_v4(),
                session_id: created.session_id,
            },
            &fx.store,
        )
        .await
        .unwrap();
        let result = resolve_code(created.code.as_str(), &fx.store).await;

        // Assert
        assert!(matches!(result, Err(DomainError::InvalidCode(_))));
    }

    #[tokio::test]
    async fn test_code_pointing_at_missing_session_is_inactive() {
        let store = MemoryStore::new();
        let session_id = Uuid::new_v4();
        store
            .set(&keys::code("QWERTY"), serde_json::Value::String(session_id.to_string()))
            .await
            .unwrap();

        let result = resolve_code("qwerty", &store).await;

        assert!(matches!(result, Err(DomainError::SessionInactive(id)) if id == session_id));
    }

    #[tokio::test]
    async fn test_list_questions_in_creation_order_with_live_flag() {
        // Arrange
        let fx = Fixture::new();
        let session_id = fx.session("Retro").await.session_id;
        let first = fx.poll(session_id, "Went well?").await;
        let second = fx.poll(session_id, "Improve?").await;
        handle_publish_question(
            &PublishQuestion {
                correlation_id: Uuid::new_v4(),
                session_id,
                question_id: second,
            },
            &fx.store,
        )
        .await
        .unwrap();

        // Act
        let listed = list_questions(session_id, &fx.store).await.unwrap();
        let single = get_question(session_id, first, &fx.store).await.unwrap();

        // Assert
        let ids: Vec<Uuid> = listed.iter().map(|q| q.question_id).collect();
        assert_eq!(ids, vec![first, second]);
        assert!(!listed[0].live);
        assert!(listed[1].live && listed[1].published);
        assert_eq!(single.text, "Went well?");
    }

    #[tokio::test]
    async fn test_get_question_from_other_session_is_not_found() {
        let fx = Fixture::new();
        let a = fx.session("A").await.session_id;
        let b = fx.session("B").await.session_id;
        let question_id = fx.poll(b, "Mine?").await;

        let result = get_question(a, question_id, &fx.store).await;

        assert!(matches!(result, Err(DomainError::QuestionNotFound { .. })));
    }
}
