//! Command abstractions.

use uuid::Uuid;

/// Trait that all moderator and participant commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// Dotted command name, e.g. `responses.submit`, used as a log field.
    fn command_type(&self) -> &'static str;

    /// Correlation ID tying the command to the request that issued it.
    fn correlation_id(&self) -> Uuid;
}
