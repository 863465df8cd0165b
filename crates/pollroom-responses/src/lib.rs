//! Pollroom: Responses bounded context.
//!
//! Responsible for accepting participant answers exactly once, keeping the
//! per-question tallies consistent with the stored answers, and ranking
//! participants on the session leaderboard.

pub mod application;
pub mod domain;
