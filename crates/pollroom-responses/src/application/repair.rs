//! Scheduling of background tally repairs.
//!
//! An accepted answer whose counter increments kept failing is still
//! accepted. The aggregate catches up through a resync, which recomputes the
//! counters from the stored answers. A resync that hits the same outage is
//! retried until it lands or its question is gone.

use std::sync::Arc;
use std::time::Duration;

use pollroom_core::error::DomainError;
use pollroom_core::store::KeyValueStore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::command_handlers::handle_resync_tally;
use crate::application::locks::TallyLocks;
use crate::domain::commands::ResyncTally;

/// Delay before the second resync attempt; doubles after each failure.
pub const INITIAL_REPAIR_BACKOFF: Duration = Duration::from_millis(25);

/// Longest delay between two resync attempts.
pub const MAX_REPAIR_BACKOFF: Duration = Duration::from_secs(5);

/// Accepts requests to resync a question's tally at some later point.
pub trait TallyRepair: Send + Sync {
    /// Queues a resync of the tally of `question_id`.
    fn schedule(&self, session_id: Uuid, question_id: Uuid);
}

/// Runs each repair as a detached tokio task against the shared store.
#[derive(Clone)]
pub struct SpawnedRepair {
    store: Arc<dyn KeyValueStore>,
    locks: Arc<TallyLocks>,
}

impl SpawnedRepair {
    /// Creates a scheduler over `store`, resyncing under `locks`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, locks: Arc<TallyLocks>) -> Self {
        Self { store, locks }
    }
}

/// Resyncs one tally until an attempt succeeds or fails for good.
async fn repair(store: &dyn KeyValueStore, locks: &TallyLocks, command: ResyncTally) {
    let (session_id, question_id) = (command.session_id, command.question_id);
    let mut backoff = INITIAL_REPAIR_BACKOFF;
    let mut attempt = 0_u32;
    loop {
        attempt = attempt.saturating_add(1);
        match handle_resync_tally(&command, store, locks).await {
            Ok(tally) => {
                info!(%session_id, %question_id, attempt, total = tally.total, "tally repaired");
                return;
            }
            Err(
                DomainError::SessionNotFound(_)
                | DomainError::SessionClosed(_)
                | DomainError::QuestionNotFound { .. },
            ) => {
                debug!(%session_id, %question_id, "question gone; nothing to repair");
                return;
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    %session_id,
                    %question_id,
                    attempt,
                    retry_in_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "tally repair failed; retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_REPAIR_BACKOFF);
            }
            Err(e) => {
                error!(%session_id, %question_id, attempt, error = %e, "tally repair abandoned");
                return;
            }
        }
    }
}

impl TallyRepair for SpawnedRepair {
    fn schedule(&self, session_id: Uuid, question_id: Uuid) {
        let store = Arc::clone(&self.store);
        let locks = Arc::clone(&self.locks);
        let command = ResyncTally {
            correlation_id: Uuid::new_v4(),
            session_id,
            question_id,
        };
        tokio::spawn(async move { repair(store.as_ref(), &locks, command).await });
    }
}
