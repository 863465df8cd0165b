//! Aggregate roots for the session context: the session lifecycle state
//! machine and question definitions.

use chrono::{DateTime, Utc};
use pollroom_core::error::DomainError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::codes::JoinCode;

/// Longest accepted session title, in characters.
pub const MAX_TITLE_CHARS: usize = 200;
/// Longest accepted question prompt, in characters.
pub const MAX_PROMPT_CHARS: usize = 1000;
/// Longest accepted option label, in characters.
pub const MAX_OPTION_CHARS: usize = 200;
/// Closed questions need at least this many options.
pub const MIN_OPTIONS: usize = 2;
/// Closed questions may have at most this many options.
pub const MAX_OPTIONS: usize = 20;

/// Immutable attributes of a session, written once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Session identifier.
    pub id: Uuid,
    /// Join code participants type in.
    pub code: JoinCode,
    /// Moderator-supplied title.
    pub title: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Mutable part of a session. Stored under its own key and only replaced by
/// compare-and-swap, so transitions never overwrite each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// False once the session is closed or being deleted.
    pub active: bool,
    /// The live question, if any. A weak reference: the question may be
    /// removed by a cascade before this pointer is.
    pub current_question_id: Option<Uuid>,
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Accepting questions, none live yet.
    Open,
    /// Collecting answers for one question.
    QuestionLive(Uuid),
    /// Terminal; read-only.
    Closed,
}

impl Lifecycle {
    /// Wire name of the phase.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::QuestionLive(_) => "question_live",
            Self::Closed => "closed",
        }
    }
}

impl SessionState {
    /// State of a freshly created session.
    #[must_use]
    pub fn opened() -> Self {
        Self {
            active: true,
            current_question_id: None,
        }
    }

    /// Derives the lifecycle phase.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        match (self.active, self.current_question_id) {
            (false, _) => Lifecycle::Closed,
            (true, None) => Lifecycle::Open,
            (true, Some(question_id)) => Lifecycle::QuestionLive(question_id),
        }
    }

    /// Fails with `SessionClosed` unless the session still accepts
    /// transitions.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SessionClosed` if the session is closed.
    pub fn ensure_active(&self, session_id: Uuid) -> Result<(), DomainError> {
        if self.active {
            Ok(())
        } else {
            Err(DomainError::SessionClosed(session_id))
        }
    }

    /// Moves the current-question pointer to `question_id`. Returns `None`
    /// when that question is already live, meaning there is nothing to write.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SessionClosed` if the session is closed.
    pub fn publish(
        &self,
        session_id: Uuid,
        question_id: Uuid,
    ) -> Result<Option<SessionState>, DomainError> {
        self.ensure_active(session_id)?;
        if self.current_question_id == Some(question_id) {
            return Ok(None);
        }
        Ok(Some(SessionState {
            active: true,
            current_question_id: Some(question_id),
        }))
    }

    /// Closes the session. The current-question pointer is kept for reads.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SessionClosed` if the session is already closed.
    pub fn close(&self, session_id: Uuid) -> Result<SessionState, DomainError> {
        self.ensure_active(session_id)?;
        Ok(self.deactivated())
    }

    /// The inactive form of this state. Used by delete, which must succeed
    /// on closed sessions too.
    #[must_use]
    pub fn deactivated(&self) -> SessionState {
        SessionState {
            active: false,
            current_question_id: self.current_question_id,
        }
    }
}

/// A session as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Immutable attributes.
    pub meta: SessionMeta,
    /// Lifecycle state.
    pub state: SessionState,
}

impl Session {
    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.meta.id
    }

    /// Whether `question_id` is the question currently collecting answers.
    #[must_use]
    pub fn is_live(&self, question_id: Uuid) -> bool {
        self.state.active && self.state.current_question_id == Some(question_id)
    }
}

/// The kinds of question a moderator can ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Single choice with a correct answer.
    MultipleChoice,
    /// Single choice without a correct answer.
    Poll,
    /// Free text.
    OpenEnded,
}

impl QuestionKind {
    /// Closed kinds are answered by option index and tallied.
    #[must_use]
    pub fn is_closed(self) -> bool {
        !matches!(self, Self::OpenEnded)
    }
}

/// A question definition. Everything but `published` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Question identifier.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Question kind.
    pub kind: QuestionKind,
    /// Prompt shown to participants.
    pub text: String,
    /// Option labels, in display order. Empty for open-ended questions.
    pub options: Vec<String>,
    /// Index of the correct option; multiple-choice only.
    pub correct_index: Option<u32>,
    /// Set the first time the question is presented; never cleared.
    pub published: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

fn check_text(field: &str, value: &str, max_chars: usize) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > max_chars {
        return Err(DomainError::Validation(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }
    Ok(trimmed.to_owned())
}

/// Validates and normalizes a session title.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the title is blank or too long.
pub fn validate_title(title: &str) -> Result<String, DomainError> {
    check_text("title", title, MAX_TITLE_CHARS)
}

impl Question {
    /// Builds a validated, unpublished question.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the prompt or options do not fit
    /// the kind: closed kinds need 2 to 20 non-blank options, only
    /// multiple-choice takes (and requires) an in-range correct index, and
    /// open-ended questions take no options.
    pub fn new(
        id: Uuid,
        session_id: Uuid,
        kind: QuestionKind,
        text: &str,
        options: &[String],
        correct_index: Option<u32>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let text = check_text("question text", text, MAX_PROMPT_CHARS)?;

        let options = if kind.is_closed() {
            if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
                return Err(DomainError::Validation(format!(
                    "{kind:?} questions need between {MIN_OPTIONS} and {MAX_OPTIONS} options"
                )));
            }
            options
                .iter()
                .map(|option| check_text("option", option, MAX_OPTION_CHARS))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            if !options.is_empty() {
                return Err(DomainError::Validation(
                    "open-ended questions take no options".into(),
                ));
            }
            Vec::new()
        };

        match (kind, correct_index) {
            (QuestionKind::MultipleChoice, None) => {
                return Err(DomainError::Validation(
                    "multiple-choice questions need a correct_index".into(),
                ));
            }
            (QuestionKind::MultipleChoice, Some(index)) if index as usize >= options.len() => {
                return Err(DomainError::Validation(format!(
                    "correct_index {index} is out of range for {} options",
                    options.len()
                )));
            }
            (QuestionKind::Poll | QuestionKind::OpenEnded, Some(_)) => {
                return Err(DomainError::Validation(format!(
                    "{kind:?} questions have no correct answer"
                )));
            }
            _ => {}
        }

        Ok(Self {
            id,
            session_id,
            kind,
            text,
            options,
            correct_index,
            published: false,
            created_at,
        })
    }

    /// Whether `choice` is a valid option index for this question.
    #[must_use]
    pub fn has_option(&self, choice: u32) -> bool {
        (choice as usize) < self.options.len()
    }

    /// Whether `choice` is this multiple-choice question's key.
    #[must_use]
    pub fn is_correct(&self, choice: u32) -> bool {
        self.kind == QuestionKind::MultipleChoice && self.correct_index == Some(choice)
    }
}
