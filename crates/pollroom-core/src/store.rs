//! Key-value store abstraction.
//!
//! The engine never talks to a database directly. Everything it persists is
//! a JSON value under a slash-separated [`KeyPath`], and every consistency
//! guarantee it offers is built from the handful of atomic primitives on
//! [`KeyValueStore`].

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::error::StoreError;

/// A slash-separated path addressing one value in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPath(String);

impl KeyPath {
    /// The empty path; every key lies beneath it.
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parses a path from its slash-separated form. Empty segments are
    /// dropped, so `"a//b/"` and `"a/b"` are the same key.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let joined = raw
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    /// Returns this path extended by one segment.
    #[must_use]
    pub fn child(&self, segment: impl fmt::Display) -> Self {
        if self.0.is_empty() {
            Self(segment.to_string())
        } else {
            Self(format!("{}/{segment}", self.0))
        }
    }

    /// The slash-separated representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Segment-aware prefix test: `a/b` is under `a` but not under `a/bc`.
    #[must_use]
    pub fn is_under(&self, prefix: &KeyPath) -> bool {
        if prefix.0.is_empty() || self.0 == prefix.0 {
            return true;
        }
        self.0
            .strip_prefix(&prefix.0)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A mutation observed through [`KeyValueStore::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// `key` now holds `value`, or was removed when `value` is `None`.
    Updated {
        /// The mutated key.
        key: KeyPath,
        /// The value after the mutation.
        value: Option<Value>,
    },
    /// The subscriber fell behind and missed changes; it must reload
    /// whatever state it mirrors.
    Resync,
}

/// A change stream filtered to one subtree.
#[derive(Debug)]
pub struct Subscription {
    prefix: KeyPath,
    receiver: broadcast::Receiver<StoreChange>,
}

impl Subscription {
    /// Wraps a backend's broadcast receiver, keeping only changes under
    /// `prefix`.
    #[must_use]
    pub fn new(prefix: KeyPath, receiver: broadcast::Receiver<StoreChange>) -> Self {
        Self { prefix, receiver }
    }

    /// The subtree this subscription watches.
    #[must_use]
    pub fn prefix(&self) -> &KeyPath {
        &self.prefix
    }

    fn wants(&self, change: &StoreChange) -> bool {
        match change {
            StoreChange::Updated { key, .. } => key.is_under(&self.prefix),
            StoreChange::Resync => true,
        }
    }

    /// Waits for the next relevant change. Returns `None` once the store has
    /// been dropped.
    pub async fn recv(&mut self) -> Option<StoreChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if self.wants(&change) => return Some(change),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => return Some(StoreChange::Resync),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already-buffered relevant change without waiting.
    pub fn try_recv(&mut self) -> Option<StoreChange> {
        loop {
            match self.receiver.try_recv() {
                Ok(change) if self.wants(&change) => return Some(change),
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => return Some(StoreChange::Resync),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

/// The storage contract the engine depends on.
///
/// Implementations must make `create_if_absent`, `compare_and_swap`,
/// `remove` and `increment` atomic per key across concurrent callers, and
/// must publish every mutation to subscribers in the order it was applied
/// to that key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Point read.
    async fn get(&self, key: &KeyPath) -> Result<Option<Value>, StoreError>;

    /// Unconditional write.
    async fn set(&self, key: &KeyPath, value: Value) -> Result<(), StoreError>;

    /// Removes a key and returns what it held. When several callers race to
    /// remove the same key exactly one of them receives `Some`.
    async fn remove(&self, key: &KeyPath) -> Result<Option<Value>, StoreError>;

    /// Writes `value` only if `key` holds nothing. Returns whether this call
    /// performed the write.
    async fn create_if_absent(&self, key: &KeyPath, value: Value) -> Result<bool, StoreError>;

    /// Replaces the value at `key` with `new` only if it currently equals
    /// `expected` (`None` meaning absent). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &KeyPath,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<bool, StoreError>;

    /// Atomically adds `delta` to the integer at `key` (absent counts as 0)
    /// and returns the new value.
    async fn increment(&self, key: &KeyPath, delta: i64) -> Result<i64, StoreError>;

    /// Returns every key under `prefix` with its value, ordered by key.
    async fn list(&self, prefix: &KeyPath) -> Result<Vec<(KeyPath, Value)>, StoreError>;

    /// Removes every key under `prefix` and returns how many were removed.
    async fn remove_prefix(&self, prefix: &KeyPath) -> Result<u64, StoreError>;

    /// Opens a change stream for the subtree under `prefix`.
    fn subscribe(&self, prefix: &KeyPath) -> Subscription;
}

/// Serializes a domain value for storage.
///
/// # Errors
///
/// Returns `StoreError::Corrupt` if serialization fails.
pub fn encode<T: Serialize>(key: &KeyPath, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Deserializes a stored value.
///
/// # Errors
///
/// Returns `StoreError::Corrupt` if the value does not match `T`.
pub fn decode<T: DeserializeOwned>(key: &KeyPath, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Reads and decodes the value at `key`.
///
/// # Errors
///
/// Returns `StoreError` if the read fails or the value is undecodable.
pub async fn load<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &KeyPath,
) -> Result<Option<T>, StoreError> {
    store
        .get(key)
        .await?
        .map(|value| decode(key, value))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_drops_empty_segments() {
        assert_eq!(KeyPath::parse("/a//b/"), KeyPath::parse("a/b"));
        assert_eq!(KeyPath::parse("a/b").as_str(), "a/b");
    }

    #[test]
    fn test_child_builds_nested_paths() {
        let key = KeyPath::root().child("answers").child(42).child("p-1");
        assert_eq!(key.as_str(), "answers/42/p-1");
        assert_eq!(key.segments().collect::<Vec<_>>(), vec!["answers", "42", "p-1"]);
    }

    #[test]
    fn test_is_under_respects_segment_boundaries() {
        let prefix = KeyPath::parse("tallies/s1");
        assert!(KeyPath::parse("tallies/s1/q/total").is_under(&prefix));
        assert!(KeyPath::parse("tallies/s1").is_under(&prefix));
        assert!(!KeyPath::parse("tallies/s10/q/total").is_under(&prefix));
        assert!(KeyPath::parse("anything").is_under(&KeyPath::root()));
    }

    #[tokio::test]
    async fn test_subscription_filters_other_subtrees() {
        // Arrange
        let (tx, rx) = broadcast::channel(8);
        let mut sub = Subscription::new(KeyPath::parse("sessions/a"), rx);

        // Act
        tx.send(StoreChange::Updated {
            key: KeyPath::parse("sessions/b/state"),
            value: None,
        })
        .unwrap();
        tx.send(StoreChange::Updated {
            key: KeyPath::parse("sessions/a/state"),
            value: Some(Value::Bool(true)),
        })
        .unwrap();

        // Assert
        let change = sub.recv().await.unwrap();
        assert_eq!(
            change,
            StoreChange::Updated {
                key: KeyPath::parse("sessions/a/state"),
                value: Some(Value::Bool(true)),
            }
        );
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscription_reports_resync() {
        // Arrange
        let (tx, rx) = broadcast::channel(1);
        let mut sub = Subscription::new(KeyPath::root(), rx);

        // Act
        for i in 0..3 {
            tx.send(StoreChange::Updated {
                key: KeyPath::root().child(i),
                value: None,
            })
            .unwrap();
        }

        // Assert
        assert_eq!(sub.recv().await, Some(StoreChange::Resync));
    }
}
