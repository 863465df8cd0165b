//! Test stores: `KeyValueStore` implementations that misbehave on purpose.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use pollroom_core::error::StoreError;
use pollroom_core::store::{KeyPath, KeyValueStore, StoreChange, Subscription};
use serde_json::Value;
use tokio::sync::{Notify, broadcast};

fn refused() -> StoreError {
    StoreError::Unavailable("connection refused".into())
}

/// A store whose every call fails with a retryable `Unavailable` error.
/// Useful for testing error-handling paths.
#[derive(Debug)]
pub struct FailingStore {
    changes: broadcast::Sender<StoreChange>,
}

impl FailingStore {
    /// Creates the store.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1);
        Self { changes }
    }
}

impl Default for FailingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &KeyPath) -> Result<Option<Value>, StoreError> {
        Err(refused())
    }

    async fn set(&self, _key: &KeyPath, _value: Value) -> Result<(), StoreError> {
        Err(refused())
    }

    async fn remove(&self, _key: &KeyPath) -> Result<Option<Value>, StoreError> {
        Err(refused())
    }

    async fn create_if_absent(&self, _key: &KeyPath, _value: Value) -> Result<bool, StoreError> {
        Err(refused())
    }

    async fn compare_and_swap(
        &self,
        _key: &KeyPath,
        _expected: Option<&Value>,
        _new: Value,
    ) -> Result<bool, StoreError> {
        Err(refused())
    }

    async fn increment(&self, _key: &KeyPath, _delta: i64) -> Result<i64, StoreError> {
        Err(refused())
    }

    async fn list(&self, _prefix: &KeyPath) -> Result<Vec<(KeyPath, Value)>, StoreError> {
        Err(refused())
    }

    async fn remove_prefix(&self, _prefix: &KeyPath) -> Result<u64, StoreError> {
        Err(refused())
    }

    fn subscribe(&self, prefix: &KeyPath) -> Subscription {
        Subscription::new(prefix.clone(), self.changes.subscribe())
    }
}

/// Wraps a real store and makes its next `n` increments fail and, if
/// configured, removes a subtree right after every successful
/// create-if-absent. Everything else passes straight through.
pub struct FlakyCounterStore {
    inner: Arc<dyn KeyValueStore>,
    failing_increments: AtomicU32,
    vanish_after_create: Option<KeyPath>,
}

impl FlakyCounterStore {
    /// Fails the next `failing_increments` increment calls.
    #[must_use]
    pub fn new(inner: Arc<dyn KeyValueStore>, failing_increments: u32) -> Self {
        Self {
            inner,
            failing_increments: AtomicU32::new(failing_increments),
            vanish_after_create: None,
        }
    }

    /// After a successful create-if-absent, removes everything under
    /// `prefix`, simulating a concurrent delete landing mid-request.
    #[must_use]
    pub fn vanishing_after_create(mut self, prefix: KeyPath) -> Self {
        self.vanish_after_create = Some(prefix);
        self
    }

    /// Increments that are still scheduled to fail.
    pub fn remaining_failures(&self) -> u32 {
        self.failing_increments.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for FlakyCounterStore {
    async fn get(&self, key: &KeyPath) -> Result<Option<Value>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &KeyPath, value: Value) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &KeyPath) -> Result<Option<Value>, StoreError> {
        self.inner.remove(key).await
    }

    async fn create_if_absent(&self, key: &KeyPath, value: Value) -> Result<bool, StoreError> {
        let created = self.inner.create_if_absent(key, value).await?;
        if created && let Some(prefix) = &self.vanish_after_create {
            self.inner.remove_prefix(prefix).await?;
        }
        Ok(created)
    }

    async fn compare_and_swap(
        &self,
        key: &KeyPath,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        self.inner.compare_and_swap(key, expected, new).await
    }

    async fn increment(&self, key: &KeyPath, delta: i64) -> Result<i64, StoreError> {
        let should_fail = self
            .failing_increments
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StoreError::Unavailable("counter shard timed out".into()));
        }
        self.inner.increment(key, delta).await
    }

    async fn list(&self, prefix: &KeyPath) -> Result<Vec<(KeyPath, Value)>, StoreError> {
        self.inner.list(prefix).await
    }

    async fn remove_prefix(&self, prefix: &KeyPath) -> Result<u64, StoreError> {
        self.inner.remove_prefix(prefix).await
    }

    fn subscribe(&self, prefix: &KeyPath) -> Subscription {
        self.inner.subscribe(prefix)
    }
}

/// Wraps a real store and stalls the first `list` under a prefix until the
/// test releases it. By default the stall comes before the read reaches the
/// inner store; with [`GatedListStore::after_read`] it comes after, so the
/// caller gets a value that may be stale by the time it returns.
pub struct GatedListStore {
    inner: Arc<dyn KeyValueStore>,
    prefix: KeyPath,
    stall_after_read: bool,
    armed: AtomicBool,
    reached: Notify,
    released: Notify,
}

impl GatedListStore {
    /// Stalls the first list under `prefix` before it reads.
    #[must_use]
    pub fn new(inner: Arc<dyn KeyValueStore>, prefix: KeyPath) -> Self {
        Self {
            inner,
            prefix,
            stall_after_read: false,
            armed: AtomicBool::new(true),
            reached: Notify::new(),
            released: Notify::new(),
        }
    }

    /// Stalls after the read instead.
    #[must_use]
    pub fn after_read(mut self) -> Self {
        self.stall_after_read = true;
        self
    }

    /// Resolves once a list call is stalled at the gate.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Lets the stalled list call continue.
    pub fn release(&self) {
        self.released.notify_one();
    }

    async fn stall(&self) {
        self.reached.notify_one();
        self.released.notified().await;
    }
}

#[async_trait]
impl KeyValueStore for GatedListStore {
    async fn get(&self, key: &KeyPath) -> Result<Option<Value>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &KeyPath, value: Value) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &KeyPath) -> Result<Option<Value>, StoreError> {
        self.inner.remove(key).await
    }

    async fn create_if_absent(&self, key: &KeyPath, value: Value) -> Result<bool, StoreError> {
        self.inner.create_if_absent(key, value).await
    }

    async fn compare_and_swap(
        &self,
        key: &KeyPath,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        self.inner.compare_and_swap(key, expected, new).await
    }

    async fn increment(&self, key: &KeyPath, delta: i64) -> Result<i64, StoreError> {
        self.inner.increment(key, delta).await
    }

    async fn list(&self, prefix: &KeyPath) -> Result<Vec<(KeyPath, Value)>, StoreError> {
        let gated = prefix.is_under(&self.prefix) && self.armed.swap(false, Ordering::SeqCst);
        if !gated {
            return self.inner.list(prefix).await;
        }
        if self.stall_after_read {
            let listed = self.inner.list(prefix).await;
            self.stall().await;
            listed
        } else {
            self.stall().await;
            self.inner.list(prefix).await
        }
    }

    async fn remove_prefix(&self, prefix: &KeyPath) -> Result<u64, StoreError> {
        self.inner.remove_prefix(prefix).await
    }

    fn subscribe(&self, prefix: &KeyPath) -> Subscription {
        self.inner.subscribe(prefix)
    }
}
