//! Per-session notification fan-out.
//!
//! One relay task per process consumes the store's change stream in the
//! order mutations were applied. It folds whatever has queued up into a set
//! of targets (a session record, a question's results), re-reads each
//! target once and broadcasts the fresh snapshot to that session's
//! subscribers. Snapshots are read after the changes that triggered them, so
//! a subscriber never receives a state older than one it already saw.
//!
//! A relay refresh and the initial snapshot of [`ChangeFeed::open`] take the
//! same read lock. Whatever a new subscriber receives after its snapshot was
//! therefore read after that snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use pollroom_core::error::DomainError;
use pollroom_core::keys::{self, KeyScope};
use pollroom_core::store::{KeyPath, KeyValueStore, StoreChange, Subscription};
use pollroom_responses::application::query_handlers::{ResultsView, get_results};
use pollroom_session::application::query_handlers::{SessionView, get_session};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of notifications buffered per session channel.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Changes folded into one batch at most, so a flood cannot starve readers.
const MAX_BATCH: usize = 512;

/// What live subscribers receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The session record or its question list changed.
    SessionChanged {
        /// The session as it is now.
        session: SessionView,
    },
    /// Answers or counters of one question changed.
    ResultsChanged {
        /// The question.
        question_id: Uuid,
        /// Its results as they are now.
        results: ResultsView,
    },
    /// The session no longer exists.
    SessionDeleted {
        /// The deleted session.
        session_id: Uuid,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Target {
    Session(Uuid),
    Results(Uuid, Uuid),
}

impl Target {
    fn session_id(self) -> Uuid {
        match self {
            Self::Session(id) | Self::Results(id, _) => id,
        }
    }
}

/// Ordered, de-duplicated set of things to re-read.
#[derive(Debug, Default)]
struct Batch {
    targets: Vec<Target>,
    seen: HashSet<Target>,
    resync: bool,
}

impl Batch {
    fn absorb(&mut self, change: StoreChange) {
        match change {
            StoreChange::Resync => self.resync = true,
            StoreChange::Updated { key, .. } => {
                let target = match keys::classify(&key) {
                    Some(KeyScope::Session(s) | KeyScope::Question(s, _)) => Target::Session(s),
                    Some(KeyScope::Results(s, q)) => Target::Results(s, q),
                    None => return,
                };
                if self.seen.insert(target) {
                    self.targets.push(target);
                }
            }
        }
    }
}

/// Fans store changes out to per-session broadcast channels.
pub struct ChangeFeed {
    store: Arc<dyn KeyValueStore>,
    channels: DashMap<Uuid, broadcast::Sender<Notification>>,
    capacity: usize,
    reads: Mutex<()>,
}

impl ChangeFeed {
    /// Creates a feed over `store` whose session channels buffer up to
    /// `capacity` notifications; slower subscribers skip ahead.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            store,
            channels: DashMap::new(),
            capacity: capacity.max(1),
            reads: Mutex::new(()),
        })
    }

    /// Subscribes to notifications for one session.
    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribes to one session and reads its snapshot, with no relay
    /// refresh in between. Every notification later received was read after
    /// the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SessionNotFound` for an unknown session and
    /// `DomainError::Store` if a read fails.
    pub async fn open(
        &self,
        session_id: Uuid,
    ) -> Result<(Vec<Notification>, broadcast::Receiver<Notification>), DomainError> {
        let _reads = self.reads.lock().await;
        let rx = self.subscribe(session_id);
        let snapshot = self.snapshot(session_id).await?;
        Ok((snapshot, rx))
    }

    /// Number of sessions with at least one live subscriber.
    #[must_use]
    pub fn watched_sessions(&self) -> usize {
        self.channels
            .iter()
            .filter(|entry| entry.value().receiver_count() > 0)
            .count()
    }

    /// Starts the relay task. The store subscription is opened before this
    /// returns, so no change made afterwards is missed.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let changes = self.store.subscribe(&KeyPath::root());
        let feed = Arc::clone(self);
        tokio::spawn(async move { feed.run(changes).await })
    }

    /// What a new subscriber should see first: the session and, if a
    /// question is live, its results.
    async fn snapshot(&self, session_id: Uuid) -> Result<Vec<Notification>, DomainError> {
        let session = get_session(session_id, self.store.as_ref()).await?;
        let mut notifications = Vec::with_capacity(2);
        let current = session.current_question_id;
        notifications.push(Notification::SessionChanged { session });
        if let Some(question_id) = current
            && let Some(results) = self.results(session_id, question_id).await
        {
            notifications.push(results);
        }
        Ok(notifications)
    }

    async fn run(self: Arc<Self>, mut changes: Subscription) {
        info!("change feed started");
        while let Some(first) = changes.recv().await {
            let mut batch = Batch::default();
            batch.absorb(first);
            while batch.targets.len() < MAX_BATCH
                && let Some(change) = changes.try_recv()
            {
                batch.absorb(change);
            }

            if batch.resync {
                debug!("change stream lagged; refreshing every watched session");
                self.refresh_all().await;
            } else {
                for target in batch.targets {
                    self.refresh(target).await;
                }
            }
            self.channels.retain(|_, sender| sender.receiver_count() > 0);
        }
        info!("change feed stopped: store closed");
    }

    fn sender(&self, session_id: Uuid) -> Option<broadcast::Sender<Notification>> {
        self.channels
            .get(&session_id)
            .filter(|sender| sender.receiver_count() > 0)
            .map(|sender| sender.clone())
    }

    async fn results(&self, session_id: Uuid, question_id: Uuid) -> Option<Notification> {
        match get_results(session_id, question_id, self.store.as_ref()).await {
            Ok(results) => Some(Notification::ResultsChanged {
                question_id,
                results,
            }),
            // Gone with its session; the session notification covers it.
            Err(DomainError::SessionNotFound(_) | DomainError::QuestionNotFound { .. }) => None,
            Err(e) => {
                warn!(%session_id, %question_id, error = %e, "results snapshot failed");
                None
            }
        }
    }

    async fn refresh(&self, target: Target) {
        let _reads = self.reads.lock().await;
        let Some(sender) = self.sender(target.session_id()) else {
            return;
        };
        let notification = match target {
            Target::Session(session_id) => {
                match get_session(session_id, self.store.as_ref()).await {
                    Ok(session) => Some(Notification::SessionChanged { session }),
                    Err(DomainError::SessionNotFound(_)) => {
                        Some(Notification::SessionDeleted { session_id })
                    }
                    Err(e) => {
                        warn!(%session_id, error = %e, "session snapshot failed");
                        None
                    }
                }
            }
            Target::Results(session_id, question_id) => {
                self.results(session_id, question_id).await
            }
        };
        if let Some(notification) = notification {
            // Receivers may have gone since the check; that is fine.
            let _ = sender.send(notification);
        }
    }

    async fn refresh_all(&self) {
        let watched: Vec<Uuid> = self
            .channels
            .iter()
            .filter(|entry| entry.value().receiver_count() > 0)
            .map(|entry| *entry.key())
            .collect();
        for session_id in watched {
            self.refresh(Target::Session(session_id)).await;
            if let Ok(session) = get_session(session_id, self.store.as_ref()).await
                && let Some(question_id) = session.current_question_id
            {
                self.refresh(Target::Results(session_id, question_id)).await;
            }
        }
    }
}
