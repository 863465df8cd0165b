//! Pollroom Store: key-value store backends.
//!
//! `MemoryStore` serves single-node deployments and tests; `PgStore` shares
//! state (and change notifications) between nodes through PostgreSQL.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;
