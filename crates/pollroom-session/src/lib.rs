//! Pollroom: Session bounded context.
//!
//! Responsible for the session lifecycle state machine, the join-code
//! directory and question definitions.

pub mod application;
pub mod domain;
