//! Command handlers for the session context.
//!
//! Each handler reads what it needs from the store, runs the domain
//! transition and writes the result back with the store's atomic primitives.
//! Session state is only ever replaced by compare-and-swap against the value
//! the handler read.

use std::sync::Mutex;

use pollroom_core::clock::Clock;
use pollroom_core::error::{DomainError, StoreError};
use pollroom_core::id::IdAllocator;
use pollroom_core::keys;
use pollroom_core::rng::DeterministicRng;
use pollroom_core::store::{KeyValueStore, decode, encode};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::persistence::{load_session, load_state};
use crate::domain::aggregates::{Question, SessionMeta, SessionState, validate_title};
use crate::domain::codes::JoinCode;
use crate::domain::commands::{
    CloseSession, CreateQuestion, CreateSession, DeleteSession, PublishQuestion,
};

/// Join-code draws attempted before registration gives up.
pub const MAX_CODE_ATTEMPTS: usize = 64;

/// Compare-and-swap rounds a state transition gets under contention.
pub const MAX_TRANSITION_ATTEMPTS: usize = 8;

/// Result of creating a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreated {
    /// The new session.
    pub session_id: Uuid,
    /// Its join code.
    pub code: JoinCode,
}

/// Result of publishing a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The question became the live one.
    Published,
    /// The question was already live; nothing was written.
    AlreadyLive,
}

fn contention(session_id: Uuid, action: &str) -> DomainError {
    DomainError::Store(StoreError::Unavailable(format!(
        "{action} on session {session_id} lost {MAX_TRANSITION_ATTEMPTS} compare-and-swap rounds"
    )))
}

/// Claims a join code for `session_id`, drawing new candidates on collision.
///
/// The RNG mutex is held only while drawing, never across an await.
async fn register_code(
    session_id: Uuid,
    rng: &Mutex<dyn DeterministicRng + Send>,
    store: &dyn KeyValueStore,
) -> Result<JoinCode, DomainError> {
    let target = Value::String(session_id.to_string());
    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let code = {
            let mut rng_guard = rng
                .lock()
                .map_err(|e| DomainError::Infrastructure(format!("RNG mutex poisoned: {e}")))?;
            JoinCode::generate(&mut *rng_guard)
        };
        if store
            .create_if_absent(&keys::code(code.as_str()), target.clone())
            .await?
        {
            return Ok(code);
        }
        debug!(%code, attempt, "join code collision");
    }
    Err(DomainError::Infrastructure(format!(
        "no free join code after {MAX_CODE_ATTEMPTS} attempts"
    )))
}

/// Handles the `CreateSession` command: validates the title, claims a join
/// code and writes the session in the `Open` state.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a bad title,
/// `DomainError::Infrastructure` if no join code could be claimed, and
/// `DomainError::Store` if a write fails.
pub async fn handle_create_session(
    command: &CreateSession,
    clock: &dyn Clock,
    rng: &Mutex<dyn DeterministicRng + Send>,
    ids: &dyn IdAllocator,
    store: &dyn KeyValueStore,
) -> Result<SessionCreated, DomainError> {
    let title = validate_title(&command.title)?;
    let session_id = ids.next_id();
    let code = register_code(session_id, rng, store).await?;

    let meta = SessionMeta {
        id: session_id,
        code: code.clone(),
        title,
        created_at: clock.now(),
    };
    let meta_key = keys::session_meta(session_id);
    store.set(&meta_key, encode(&meta_key, &meta)?).await?;

    let state_key = keys::session_state(session_id);
    if !store
        .create_if_absent(&state_key, encode(&state_key, &SessionState::opened())?)
        .await?
    {
        return Err(StoreError::Atomicity(format!("fresh session {session_id} already had state")).into());
    }

    info!(
        session_id = %session_id,
        code = %code,
        correlation_id = %command.correlation_id,
        "session created"
    );
    Ok(SessionCreated { session_id, code })
}

/// Handles the `CreateQuestion` command: validates the definition and stores
/// it unpublished.
///
/// # Errors
///
/// Returns `DomainError::SessionNotFound` for an unknown session,
/// `DomainError::SessionClosed` once the session is closed,
/// `DomainError::Validation` for a malformed question, and
/// `DomainError::Store` if a store call fails.
pub async fn handle_create_question(
    command: &CreateQuestion,
    clock: &dyn Clock,
    ids: &dyn IdAllocator,
    store: &dyn KeyValueStore,
) -> Result<Question, DomainError> {
    let session = load_session(store, command.session_id).await?;
    session.state.ensure_active(command.session_id)?;

    let question = Question::new(
        ids.next_id(),
        command.session_id,
        command.kind,
        &command.text,
        &command.options,
        command.correct_index,
        clock.now(),
    )?;

    let key = keys::question(command.session_id, question.id);
    if !store.create_if_absent(&key, encode(&key, &question)?).await? {
        return Err(StoreError::Atomicity(format!("question id {} reused", question.id)).into());
    }
    if load_state(store, command.session_id).await?.is_none() {
        // Deleted while we were writing; do not leave an orphan behind.
        store.remove(&key).await?;
        return Err(DomainError::SessionClosed(command.session_id));
    }

    info!(
        session_id = %command.session_id,
        question_id = %question.id,
        kind = ?question.kind,
        correlation_id = %command.correlation_id,
        "question created"
    );
    Ok(question)
}

/// Handles the `PublishQuestion` command: marks the question published and
/// moves the session's current-question pointer to it.
///
/// Concurrent publishes are last-writer-wins: each round re-reads the state
/// and swaps only against what it read. Publishing the live question again
/// writes nothing.
///
/// # Errors
///
/// Returns `DomainError::SessionNotFound` for an unknown session,
/// `DomainError::QuestionNotFound` if the question is not in the session,
/// `DomainError::SessionClosed` once the session is closed, and a retryable
/// `DomainError::Store` if every compare-and-swap round loses.
pub async fn handle_publish_question(
    command: &PublishQuestion,
    store: &dyn KeyValueStore,
) -> Result<PublishOutcome, DomainError> {
    let session_id = command.session_id;
    let question_id = command.question_id;
    load_session(store, session_id).await?;

    let state_key = keys::session_state(session_id);
    let question_key = keys::question(session_id, question_id);

    for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
        let (state, raw_state) = load_state(store, session_id)
            .await?
            .ok_or(DomainError::SessionClosed(session_id))?;
        state.ensure_active(session_id)?;

        let raw_question = store
            .get(&question_key)
            .await?
            .ok_or(DomainError::QuestionNotFound {
                session_id,
                question_id,
            })?;
        let Some(next) = state.publish(session_id, question_id)? else {
            debug!(%session_id, %question_id, "question already live");
            return Ok(PublishOutcome::AlreadyLive);
        };

        let mut question: Question = decode(&question_key, raw_question.clone())?;
        if !question.published {
            question.published = true;
            // Swapping instead of setting keeps a concurrent cascade from
            // being undone.
            let marked = store
                .compare_and_swap(
                    &question_key,
                    Some(&raw_question),
                    encode(&question_key, &question)?,
                )
                .await?;
            if !marked {
                continue;
            }
        }

        if store
            .compare_and_swap(&state_key, Some(&raw_state), encode(&state_key, &next)?)
            .await?
        {
            info!(
                %session_id,
                %question_id,
                correlation_id = %command.correlation_id,
                "question published"
            );
            return Ok(PublishOutcome::Published);
        }
        debug!(%session_id, attempt, "publish lost a compare-and-swap round");
    }

    warn!(%session_id, %question_id, "publish gave up under contention");
    Err(contention(session_id, "publish"))
}

/// Handles the `CloseSession` command: moves the session to `Closed`.
///
/// # Errors
///
/// Returns `DomainError::SessionNotFound` for an unknown session,
/// `DomainError::SessionClosed` if it is already closed, and
/// `DomainError::Store` if a store call fails or contention persists.
pub async fn handle_close_session(
    command: &CloseSession,
    store: &dyn KeyValueStore,
) -> Result<(), DomainError> {
    let session_id = command.session_id;
    load_session(store, session_id).await?;
    let state_key = keys::session_state(session_id);

    for _ in 0..MAX_TRANSITION_ATTEMPTS {
        let (state, raw_state) = load_state(store, session_id)
            .await?
            .ok_or(DomainError::SessionClosed(session_id))?;
        let closed = state.close(session_id)?;
        if store
            .compare_and_swap(&state_key, Some(&raw_state), encode(&state_key, &closed)?)
            .await?
        {
            info!(
                %session_id,
                correlation_id = %command.correlation_id,
                "session closed"
            );
            return Ok(());
        }
    }
    Err(contention(session_id, "close"))
}

/// Handles the `DeleteSession` command: deactivates the session, releases
/// its join code and removes every record it owns.
///
/// Deactivating first means submissions racing the cascade are rejected, and
/// any row they manage to write is purged by their own post-write check.
///
/// # Errors
///
/// Returns `DomainError::SessionNotFound` for an unknown session and
/// `DomainError::Store` if a store call fails.
pub async fn handle_delete_session(
    command: &DeleteSession,
    store: &dyn KeyValueStore,
) -> Result<(), DomainError> {
    let session_id = command.session_id;
    let session = load_session(store, session_id).await?;
    let state_key = keys::session_state(session_id);

    let mut deactivated = false;
    for _ in 0..MAX_TRANSITION_ATTEMPTS {
        let Some((state, raw_state)) = load_state(store, session_id).await? else {
            deactivated = true;
            break;
        };
        if !state.active {
            deactivated = true;
            break;
        }
        if store
            .compare_and_swap(
                &state_key,
                Some(&raw_state),
                encode(&state_key, &state.deactivated())?,
            )
            .await?
        {
            deactivated = true;
            break;
        }
    }
    if !deactivated {
        return Err(contention(session_id, "delete"));
    }

    let code_key = keys::code(session.meta.code.as_str());
    let ours = Value::String(session_id.to_string());
    if let Some(previous) = store.remove(&code_key).await?
        && previous != ours
    {
        // The code was already released and claimed by a newer session.
        store.create_if_absent(&code_key, previous).await?;
    }

    let mut removed = 0;
    for prefix in keys::session_subtrees(session_id) {
        removed += store.remove_prefix(&prefix).await?;
    }

    info!(
        %session_id,
        removed,
        correlation_id = %command.correlation_id,
        "session deleted"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pollroom_core::error::DomainError;
    use pollroom_core::keys;
    use pollroom_core::rng::DeterministicRng;
    use pollroom_core::store::{KeyValueStore, load};
    use pollroom_store::MemoryStore;
    use pollroom_test_support::{FailingStore, FixedClock, MockRng, SequenceRng, SequentialIds};
    use serde_json::Value;
    use uuid::Uuid;

    use super::*;
    use crate::domain::aggregates::QuestionKind;

    struct Fixture {
        clock: FixedClock,
        rng: Mutex<SequenceRng>,
        ids: SequentialIds,
        store: Arc<MemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                clock: FixedClock::default(),
                rng: Mutex::new(SequenceRng::new((0..32).collect())),
                ids: SequentialIds::new(),
                store: Arc::new(MemoryStore::new()),
            }
        }

        async fn session(&self) -> SessionCreated {
            let rng: &Mutex<dyn DeterministicRng + Send> = &self.rng;
            handle_create_session(
                &CreateSession {
                    correlation_id: Uuid::new_v4(),
                    title: "Friday quiz".into(),
                },
                &self.clock,
                rng,
                &self.ids,
                self.store.as_ref(),
            )
            .await
            .unwrap()
        }

        async fn question(&self, session_id: Uuid) -> Question {
            handle_create_question(
                &CreateQuestion {
                    correlation_id: Uuid::new_v4(),
                    session_id,
                    kind: QuestionKind::MultipleChoice,
                    text: "2+2?".into(),
                    options: vec!["3".into(), "4".into(), "5".into()],
                    correct_index: Some(1),
                },
                &self.clock,
                &self.ids,
                self.store.as_ref(),
            )
            .await
            .unwrap()
        }

        async fn publish(&self, session_id: Uuid, question_id: Uuid) -> Result<PublishOutcome, DomainError> {
            handle_publish_question(
                &PublishQuestion {
                    correlation_id: Uuid::new_v4(),
                    session_id,
                    question_id,
                },
                self.store.as_ref(),
            )
            .await
        }

        async fn state(&self, session_id: Uuid) -> Option<SessionState> {
            load(self.store.as_ref(), &keys::session_state(session_id))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_create_session_claims_code_and_opens() {
        // Arrange
        let fx = Fixture::new();

        // Act
        let created = fx.session().await;

        // Assert
        assert_eq!(created.session_id, SequentialIds::nth(1));
        assert_eq!(created.code.as_str(), "ABCDEF");
        assert_eq!(
            fx.store.get(&keys::code("ABCDEF")).await.unwrap(),
            Some(Value::String(created.session_id.to_string()))
        );
        assert_eq!(fx.state(created.session_id).await, Some(SessionState::opened()));
    }

    #[tokio::test]
    async fn test_create_session_redraws_colliding_codes() {
        // Arrange
        let store = MemoryStore::new();
        store
            .set(&keys::code("AAAAAA"), Value::String("taken".into()))
            .await
            .unwrap();
        // First draw is AAAAAA, second is BBBBBB.
        let rng: Mutex<SequenceRng> = Mutex::new(SequenceRng::new(vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1]));
        let rng_ref: &Mutex<dyn DeterministicRng + Send> = &rng;

        // Act
        let created = handle_create_session(
            &CreateSession {
                correlation_id: Uuid::new_v4(),
                title: "Retro".into(),
            },
            &FixedClock::default(),
            rng_ref,
            &SequentialIds::new(),
            &store,
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(created.code.as_str(), "BBBBBB");
    }

    #[tokio::test]
    async fn test_create_session_gives_up_when_codes_are_exhausted() {
        // Arrange
        let store = MemoryStore::new();
        store
            .set(&keys::code("AAAAAA"), Value::String("taken".into()))
            .await
            .unwrap();
        let rng: Mutex<MockRng> = Mutex::new(MockRng);
        let rng_ref: &Mutex<dyn DeterministicRng + Send> = &rng;

        // Act
        let result = handle_create_session(
            &CreateSession {
                correlation_id: Uuid::new_v4(),
                title: "Retro".into(),
            },
            &FixedClock::default(),
            rng_ref,
            &SequentialIds::new(),
            &store,
        )
        .await;

        // Assert
        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
    }

    #[tokio::test]
    async fn test_create_session_rejects_blank_title() {
        let rng: Mutex<MockRng> = Mutex::new(MockRng);
        let rng_ref: &Mutex<dyn DeterministicRng + Send> = &rng;

        let result = handle_create_session(
            &CreateSession {
                correlation_id: Uuid::new_v4(),
                title: "   ".into(),
            },
            &FixedClock::default(),
            rng_ref,
            &SequentialIds::new(),
            &MemoryStore::new(),
        )
        .await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_session_surfaces_store_failure() {
        let rng: Mutex<MockRng> = Mutex::new(MockRng);
        let rng_ref: &Mutex<dyn DeterministicRng + Send> = &rng;

        let result = handle_create_session(
            &CreateSession {
                correlation_id: Uuid::new_v4(),
                title: "Retro".into(),
            },
            &FixedClock::default(),
            rng_ref,
            &SequentialIds::new(),
            &FailingStore::new(),
        )
        .await;

        assert!(result.as_ref().is_err_and(DomainError::is_retryable));
    }

    #[tokio::test]
    async fn test_create_question_requires_existing_open_session() {
        // Arrange
        let fx = Fixture::new();
        let created = fx.session().await;
        handle_close_session(
            &CloseSession {
                correlation_id: Uuid::new_v4(),
                session_id: created.session_id,
            },
            fx.store.as_ref(),
        )
        .await
        .unwrap();
        let command = |session_id| CreateQuestion {
            correlation_id: Uuid::new_v4(),
            session_id,
            kind: QuestionKind::Poll,
            text: "Lunch?".into(),
            options: vec!["Pizza".into(), "Sushi".into()],
            correct_index: None,
        };

        // Act
        let closed = handle_create_question(
            &command(created.session_id),
            &fx.clock,
            &fx.ids,
            fx.store.as_ref(),
        )
        .await;
        let missing =
            handle_create_question(&command(Uuid::new_v4()), &fx.clock, &fx.ids, fx.store.as_ref())
                .await;

        // Assert
        assert!(matches!(closed, Err(DomainError::SessionClosed(_))));
        assert!(matches!(missing, Err(DomainError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_publish_marks_question_and_moves_pointer() {
        // Arrange
        let fx = Fixture::new();
        let session_id = fx.session().await.session_id;
        let first = fx.question(session_id).await;
        let second = fx.question(session_id).await;

        // Act
        let a = fx.publish(session_id, first.id).await.unwrap();
        let b = fx.publish(session_id, second.id).await.unwrap();

        // Assert
        assert_eq!((a, b), (PublishOutcome::Published, PublishOutcome::Published));
        let state = fx.state(session_id).await.unwrap();
        assert_eq!(state.current_question_id, Some(second.id));
        let stored_first: Question = load(fx.store.as_ref(), &keys::question(session_id, first.id))
            .await
            .unwrap()
            .unwrap();
        assert!(stored_first.published, "published stays set after moving on");
    }

    #[tokio::test]
    async fn test_republishing_live_question_writes_nothing() {
        // Arrange
        let fx = Fixture::new();
        let session_id = fx.session().await.session_id;
        let question = fx.question(session_id).await;
        fx.publish(session_id, question.id).await.unwrap();
        let mut changes = fx.store.subscribe(&pollroom_core::store::KeyPath::root());

        // Act
        let outcome = fx.publish(session_id, question.id).await.unwrap();

        // Assert
        assert_eq!(outcome, PublishOutcome::AlreadyLive);
        assert!(changes.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_publish_rejects_foreign_question_and_closed_session() {
        // Arrange
        let fx = Fixture::new();
        let session_a = fx.session().await.session_id;
        let session_b = fx.session().await.session_id;
        let foreign = fx.question(session_b).await;
        let own = fx.question(session_a).await;

        // Act
        let wrong_session = fx.publish(session_a, foreign.id).await;
        handle_close_session(
            &CloseSession {
                correlation_id: Uuid::new_v4(),
                session_id: session_a,
            },
            fx.store.as_ref(),
        )
        .await
        .unwrap();
        let after_close = fx.publish(session_a, own.id).await;

        // Assert
        assert!(matches!(wrong_session, Err(DomainError::QuestionNotFound { .. })));
        assert!(matches!(after_close, Err(DomainError::SessionClosed(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_settle_on_one_question() {
        // Arrange
        let fx = Arc::new(Fixture::new());
        let session_id = fx.session().await.session_id;
        let mut question_ids = Vec::new();
        for _ in 0..4 {
            question_ids.push(fx.question(session_id).await.id);
        }

        // Act
        let mut handles = Vec::new();
        for question_id in question_ids.clone() {
            let fx = Arc::clone(&fx);
            handles.push(tokio::spawn(async move {
                fx.publish(session_id, question_id).await
            }));
        }
        for handle in handles {
            let _ = handle.await.unwrap();
        }

        // Assert
        let current = fx.state(session_id).await.unwrap().current_question_id;
        assert!(current.is_some_and(|id| question_ids.contains(&id)));
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let fx = Fixture::new();
        let session_id = fx.session().await.session_id;
        let close = CloseSession {
            correlation_id: Uuid::new_v4(),
            session_id,
        };

        handle_close_session(&close, fx.store.as_ref()).await.unwrap();
        let again = handle_close_session(&close, fx.store.as_ref()).await;

        assert!(!fx.state(session_id).await.unwrap().active);
        assert!(matches!(again, Err(DomainError::SessionClosed(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_everything_the_session_owns() {
        // Arrange
        let fx = Fixture::new();
        let keep = fx.session().await;
        let doomed = fx.session().await;
        let question = fx.question(doomed.session_id).await;
        fx.publish(doomed.session_id, question.id).await.unwrap();
        fx.store
            .set(
                &keys::answer(doomed.session_id, question.id, "p-1"),
                Value::from(1),
            )
            .await
            .unwrap();
        fx.store
            .increment(&keys::tally_total(doomed.session_id, question.id), 1)
            .await
            .unwrap();

        // Act
        handle_delete_session(
            &DeleteSession {
                correlation_id: Uuid::new_v4(),
                session_id: doomed.session_id,
            },
            fx.store.as_ref(),
        )
        .await
        .unwrap();

        // Assert
        for prefix in keys::session_subtrees(doomed.session_id) {
            assert!(fx.store.list(&prefix).await.unwrap().is_empty(), "{prefix} survived");
        }
        assert_eq!(fx.store.get(&keys::code(doomed.code.as_str())).await.unwrap(), None);
        assert!(fx.store.get(&keys::code(keep.code.as_str())).await.unwrap().is_some());
        assert!(fx.state(keep.session_id).await.is_some());
    }

    #[tokio::test]
    async fn test_delete_works_on_closed_sessions_and_only_once() {
        // Arrange
        let fx = Fixture::new();
        let session_id = fx.session().await.session_id;
        handle_close_session(
            &CloseSession {
                correlation_id: Uuid::new_v4(),
                session_id,
            },
            fx.store.as_ref(),
        )
        .await
        .unwrap();
        let delete = DeleteSession {
            correlation_id: Uuid::new_v4(),
            session_id,
        };

        // Act
        let first = handle_delete_session(&delete, fx.store.as_ref()).await;
        let second = handle_delete_session(&delete, fx.store.as_ref()).await;

        // Assert
        assert!(first.is_ok());
        assert!(matches!(second, Err(DomainError::SessionNotFound(_))));
        assert!(fx.store.is_empty());
    }
}
