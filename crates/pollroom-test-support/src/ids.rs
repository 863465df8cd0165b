//! Test identity allocator.

use std::sync::atomic::{AtomicU64, Ordering};

use pollroom_core::id::IdAllocator;
use uuid::Uuid;

/// Hands out `00000000-0000-0000-0000-000000000001`, `…02`, and so on.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    /// Creates an allocator whose first id is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The id the `n`th call (1-based) returns.
    #[must_use]
    pub fn nth(n: u64) -> Uuid {
        Uuid::from_u128(u128::from(n))
    }
}

impl IdAllocator for SequentialIds {
    fn next_id(&self) -> Uuid {
        Self::nth(self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
