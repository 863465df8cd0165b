//! Shared test mocks and utilities for the Pollroom engine.

mod clock;
mod ids;
mod rng;
mod store;

pub use clock::{FixedClock, fixed_time};
pub use ids::SequentialIds;
pub use rng::{MockRng, SequenceRng};
pub use store::{FailingStore, FlakyCounterStore, GatedListStore};
