//! In-process implementation of the `KeyValueStore` trait.
//!
//! Suitable for a single node. Every per-key primitive runs while holding the
//! `DashMap` shard lock for that key, and change notifications are published
//! before the lock is released, so subscribers see mutations of one key in
//! the order they were applied.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::broadcast;

use pollroom_core::error::StoreError;
use pollroom_core::store::{KeyPath, KeyValueStore, StoreChange, Subscription};

/// Default number of buffered change notifications per subscriber.
pub const DEFAULT_CHANGE_CAPACITY: usize = 1024;

/// `DashMap`-backed key-value store.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<KeyPath, Value>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_change_capacity(DEFAULT_CHANGE_CAPACITY)
    }

    /// Creates an empty store whose subscribers buffer up to `capacity`
    /// notifications before they are told to resync.
    #[must_use]
    pub fn with_change_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: DashMap::new(),
            changes,
        }
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn publish(&self, key: &KeyPath, value: Option<Value>) {
        // No receivers is not an error: nobody is watching yet.
        let _ = self.changes.send(StoreChange::Updated {
            key: key.clone(),
            value,
        });
    }

    fn remove_key(&self, key: &KeyPath) -> Option<Value> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                self.publish(key, None);
                Some(occupied.remove())
            }
            Entry::Vacant(_) => None,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &KeyPath) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &KeyPath, value: Value) -> Result<(), StoreError> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(value.clone());
                self.publish(key, Some(value));
            }
            Entry::Vacant(vacant) => {
                let _guard = vacant.insert(value.clone());
                self.publish(key, Some(value));
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &KeyPath) -> Result<Option<Value>, StoreError> {
        Ok(self.remove_key(key))
    }

    async fn create_if_absent(&self, key: &KeyPath, value: Value) -> Result<bool, StoreError> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                let _guard = vacant.insert(value.clone());
                self.publish(key, Some(value));
                Ok(true)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        key: &KeyPath,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        match (self.entries.entry(key.clone()), expected) {
            (Entry::Vacant(vacant), None) => {
                let _guard = vacant.insert(new.clone());
                self.publish(key, Some(new));
                Ok(true)
            }
            (Entry::Occupied(mut occupied), Some(expected)) if occupied.get() == expected => {
                occupied.insert(new.clone());
                self.publish(key, Some(new));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment(&self, key: &KeyPath, delta: i64) -> Result<i64, StoreError> {
        let mut counter = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Value::from(0_i64));
        let current = counter.as_i64().ok_or_else(|| StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("expected an integer counter, found {}", *counter),
        })?;
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Corrupt {
                key: key.to_string(),
                reason: format!("counter overflow adding {delta} to {current}"),
            })?;
        *counter = Value::from(next);
        self.publish(key, Some(Value::from(next)));
        Ok(next)
    }

    async fn list(&self, prefix: &KeyPath) -> Result<Vec<(KeyPath, Value)>, StoreError> {
        let mut found: Vec<(KeyPath, Value)> = self
            .entries
            .iter()
            .filter(|entry| entry.key().is_under(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    async fn remove_prefix(&self, prefix: &KeyPath) -> Result<u64, StoreError> {
        let keys: Vec<KeyPath> = self
            .entries
            .iter()
            .filter(|entry| entry.key().is_under(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.remove_key(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn subscribe(&self, prefix: &KeyPath) -> Subscription {
        Subscription::new(prefix.clone(), self.changes.subscribe())
    }
}
