//! Identity allocation.

use uuid::Uuid;

/// Issues opaque identifiers for sessions and questions.
pub trait IdAllocator: Send + Sync {
    /// Returns a fresh identifier, never handed out before.
    fn next_id(&self) -> Uuid;
}

/// Production allocator backed by random (v4) UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdAllocator for RandomIds {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}
