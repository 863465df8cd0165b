//! Domain layer for the responses context.

pub mod answers;
pub mod commands;
pub mod leaderboard;
pub mod tally;
