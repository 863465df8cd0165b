//! Pollroom: live change feed.
//!
//! Turns the store's change stream into per-session notifications for
//! moderator and participant screens.

pub mod feed;

pub use feed::{ChangeFeed, DEFAULT_FEED_CAPACITY, Notification};
