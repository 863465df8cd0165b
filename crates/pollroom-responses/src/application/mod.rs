//! Application layer for the responses context.

pub mod command_handlers;
pub mod locks;
pub mod query_handlers;
pub mod repair;

#[cfg(test)]
pub(crate) mod fixture;
