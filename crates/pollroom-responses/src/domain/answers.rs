//! Participant answers and the validation applied before they are stored.

use chrono::{DateTime, Utc};
use pollroom_core::error::DomainError;
use pollroom_session::domain::aggregates::{Question, QuestionKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default cap on free-text answers, in characters.
pub const DEFAULT_MAX_ANSWER_LENGTH: usize = 2000;
/// Longest accepted participant token.
pub const MAX_PARTICIPANT_ID_LENGTH: usize = 128;
/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 100;
/// Shown for participants who did not give a name.
pub const ANONYMOUS: &str = "Anonymous";

/// A client-chosen participant token: 1 to 128 characters of
/// `[A-Za-z0-9_-]`. Self-reported and unauthenticated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Validates a raw token.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an empty, overlong or
    /// non-token string. The token becomes a key segment, so anything
    /// outside the alphabet (notably `/`) is refused.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        if raw.is_empty() || raw.len() > MAX_PARTICIPANT_ID_LENGTH {
            return Err(DomainError::Validation(format!(
                "participant_id must be 1 to {MAX_PARTICIPANT_ID_LENGTH} characters"
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(DomainError::Validation(
                "participant_id may only contain letters, digits, '_' and '-'".into(),
            ));
        }
        Ok(Self(raw.to_owned()))
    }

    /// The token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Normalizes an optional display name; blank means anonymous.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the name is too long.
pub fn display_name(raw: Option<&str>) -> Result<String, DomainError> {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Ok(ANONYMOUS.to_owned());
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(DomainError::Validation(format!(
            "display_name must be at most {MAX_DISPLAY_NAME_CHARS} characters"
        )));
    }
    Ok(trimmed.to_owned())
}

/// What a participant submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerPayload {
    /// Index of the chosen option, for closed kinds.
    Choice(u32),
    /// Free text, for open-ended questions.
    Text(String),
}

impl AnswerPayload {
    /// Checks the payload on its own, before the session is consulted.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for blank or overlong text.
    pub fn validate_shape(&self, max_answer_length: usize) -> Result<(), DomainError> {
        if let Self::Text(text) = self {
            if text.trim().is_empty() {
                return Err(DomainError::Validation("answer text must not be empty".into()));
            }
            if text.chars().count() > max_answer_length {
                return Err(DomainError::Validation(format!(
                    "answer text must be at most {max_answer_length} characters"
                )));
            }
        }
        Ok(())
    }

    /// Checks the payload against the question it answers and returns the
    /// tally slot it counts towards (`None` for open-ended answers).
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the payload kind does not match
    /// the question kind or the option index is out of range.
    pub fn tally_slot(&self, question: &Question) -> Result<Option<u32>, DomainError> {
        match (self, question.kind) {
            (Self::Choice(choice), kind) if kind.is_closed() => {
                if question.has_option(*choice) {
                    Ok(Some(*choice))
                } else {
                    Err(DomainError::Validation(format!(
                        "choice {choice} is out of range for {} options",
                        question.options.len()
                    )))
                }
            }
            (Self::Text(_), QuestionKind::OpenEnded) => Ok(None),
            (Self::Choice(_), _) => Err(DomainError::Validation(
                "open-ended questions take a text answer".into(),
            )),
            (Self::Text(_), _) => Err(DomainError::Validation(
                "this question takes a choice answer".into(),
            )),
        }
    }
}

/// An accepted answer. Written once under its composite key and never
/// mutated; the moderator may remove it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantAnswer {
    /// Session answered in.
    pub session_id: Uuid,
    /// Question answered.
    pub question_id: Uuid,
    /// Participant token.
    pub participant_id: String,
    /// Display name, never blank.
    pub display_name: String,
    /// The answer itself.
    pub payload: AnswerPayload,
    /// Counter slot this answer incremented.
    pub tally_slot: Option<u32>,
    /// When the answer was accepted.
    pub submitted_at: DateTime<Utc>,
}

impl ParticipantAnswer {
    /// The chosen option, if this answers a closed question.
    #[must_use]
    pub fn choice(&self) -> Option<u32> {
        match self.payload {
            AnswerPayload::Choice(choice) => Some(choice),
            AnswerPayload::Text(_) => None,
        }
    }
}
