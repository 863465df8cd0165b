//! Per-question tally locks.
//!
//! Submissions and deletions share a question's lock while they move its
//! answer rows and counters; a resync holds it alone, so the rows it folds
//! and the counters it corrects are read with no writer in between. Locks
//! are striped over a fixed table, so questions that hash together merely
//! wait on each other.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Number of lock stripes.
const STRIPES: usize = 64;

/// Striped reader/writer locks keyed by (session, question).
#[derive(Debug)]
pub struct TallyLocks {
    stripes: [RwLock<()>; STRIPES],
}

impl TallyLocks {
    /// Creates an unlocked table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stripes: std::array::from_fn(|_| RwLock::new(())),
        }
    }

    fn stripe(&self, session_id: Uuid, question_id: Uuid) -> &RwLock<()> {
        let mut hasher = DefaultHasher::new();
        (session_id, question_id).hash(&mut hasher);
        // Truncation is fine: only the low bits pick the stripe.
        #[allow(clippy::cast_possible_truncation)]
        let index = hasher.finish() as usize % STRIPES;
        &self.stripes[index]
    }

    /// Shared access for a caller that adds or removes one answer.
    pub async fn counting(&self, session_id: Uuid, question_id: Uuid) -> RwLockReadGuard<'_, ()> {
        self.stripe(session_id, question_id).read().await
    }

    /// Exclusive access for a caller that recomputes the whole tally.
    pub async fn exclusive(
        &self,
        session_id: Uuid,
        question_id: Uuid,
    ) -> RwLockWriteGuard<'_, ()> {
        self.stripe(session_id, question_id).write().await
    }
}

impl Default for TallyLocks {
    fn default() -> Self {
        Self::new()
    }
}
