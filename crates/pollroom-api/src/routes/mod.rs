//! Route modules organized by bounded context.

pub mod health;
pub mod join;
pub mod live;
pub mod questions;
pub mod responses;
pub mod sessions;
