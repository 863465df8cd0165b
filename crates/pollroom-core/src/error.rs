//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Failures raised by a key-value store backend.
///
/// These are environment faults, never a verdict on the request itself: a
/// caller seeing `StoreError` cannot conclude that its data was rejected.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or did not answer in time.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store failed to honour an atomic primitive (create-if-absent,
    /// compare-and-swap or increment).
    #[error("store atomicity violated: {0}")]
    Atomicity(String),

    /// A stored value could not be decoded.
    #[error("corrupt value at {key}: {reason}")]
    Corrupt {
        /// Key holding the undecodable value.
        key: String,
        /// Decoder message.
        reason: String,
    },
}

impl StoreError {
    /// Whether the failed call may succeed if the caller tries again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Coarse classification of a [`DomainError`] for callers that only need to
/// know how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The referenced session, question or code does not exist.
    NotFound,
    /// The exactly-once invariant rejected a duplicate.
    Conflict,
    /// The action is not valid in the current lifecycle state.
    InvalidState,
    /// The request payload is malformed.
    Validation,
    /// The backing store or process environment misbehaved.
    Infrastructure,
}

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No session with this identifier exists.
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// The question does not exist or does not belong to the session.
    #[error("question {question_id} not found in session {session_id}")]
    QuestionNotFound {
        /// The session that was searched.
        session_id: Uuid,
        /// The missing question.
        question_id: Uuid,
    },

    /// The join code is not mapped to any session.
    #[error("invalid session code: {0}")]
    InvalidCode(String),

    /// The join code maps to a session that is no longer accepting
    /// participants.
    #[error("session is not active: {0}")]
    SessionInactive(Uuid),

    /// The session has been closed or deleted.
    #[error("session is closed: {0}")]
    SessionClosed(Uuid),

    /// The answer targets a question that is not the session's live one.
    #[error("question {question_id} is not live in session {session_id}")]
    InvalidQuestion {
        /// The session the answer was sent to.
        session_id: Uuid,
        /// The question the answer referenced.
        question_id: Uuid,
    },

    /// The participant already has an accepted answer for this question.
    #[error("participant {participant_id} already responded to question {question_id}")]
    AlreadyResponded {
        /// The answered question.
        question_id: Uuid,
        /// The participant token.
        participant_id: String,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A process-level failure unrelated to the store.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns the taxonomy bucket for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound(_) | Self::QuestionNotFound { .. } | Self::InvalidCode(_) => {
                ErrorKind::NotFound
            }
            Self::AlreadyResponded { .. } => ErrorKind::Conflict,
            Self::SessionInactive(_) | Self::SessionClosed(_) | Self::InvalidQuestion { .. } => {
                ErrorKind::InvalidState
            }
            Self::Validation(_) => ErrorKind::Validation,
            Self::Store(_) | Self::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }

    /// Only transient store unavailability is worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            _ => false,
        }
    }
}
