//! Shared application state.

use std::fmt;
use std::sync::{Arc, Mutex};

use pollroom_core::clock::Clock;
use pollroom_core::id::IdAllocator;
use pollroom_core::rng::DeterministicRng;
use pollroom_core::store::KeyValueStore;
use pollroom_live::ChangeFeed;
use pollroom_responses::application::locks::TallyLocks;
use pollroom_responses::application::repair::{SpawnedRepair, TallyRepair};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Time source for timestamps.
    pub clock: Arc<dyn Clock>,
    /// Randomness for join codes.
    pub rng: Arc<Mutex<dyn DeterministicRng + Send>>,
    /// Identifier source for sessions and questions.
    pub ids: Arc<dyn IdAllocator>,
    /// The backing key-value store.
    pub store: Arc<dyn KeyValueStore>,
    /// Per-question locks shared by answer writes and tally resyncs.
    pub locks: Arc<TallyLocks>,
    /// Where failed tally updates are sent for repair.
    pub repairs: Arc<dyn TallyRepair>,
    /// Live notification fan-out.
    pub feed: Arc<ChangeFeed>,
    /// Longest free-text answer accepted, in characters.
    pub max_answer_length: usize,
}

impl AppState {
    /// Create new application state. The change feed is built but not
    /// started; call [`ChangeFeed::spawn`] on `feed` once a runtime is up.
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        rng: Arc<Mutex<dyn DeterministicRng + Send>>,
        ids: Arc<dyn IdAllocator>,
        max_answer_length: usize,
        feed_capacity: usize,
    ) -> Self {
        let locks = Arc::new(TallyLocks::new());
        Self {
            repairs: Arc::new(SpawnedRepair::new(Arc::clone(&store), Arc::clone(&locks))),
            locks,
            feed: ChangeFeed::new(Arc::clone(&store), feed_capacity),
            clock,
            rng,
            ids,
            store,
            max_answer_length,
        }
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("max_answer_length", &self.max_answer_length)
            .field("watched_sessions", &self.feed.watched_sessions())
            .finish_non_exhaustive()
    }
}
