//! Pollroom Core: shared domain abstractions.
//!
//! This crate defines the fundamental traits and types that all bounded
//! contexts depend on: the key-value store contract, the determinism seams
//! (clock, RNG, identity allocation) and the error taxonomy. It contains no
//! infrastructure code.

pub mod clock;
pub mod command;
pub mod error;
pub mod id;
pub mod keys;
pub mod rng;
pub mod store;
