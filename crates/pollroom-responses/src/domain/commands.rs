//! Commands for the responses context.

use pollroom_core::command::Command;
use uuid::Uuid;

use super::answers::AnswerPayload;

/// Command to submit a participant's answer to the live question.
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session answered in.
    pub session_id: Uuid,
    /// The question answered.
    pub question_id: Uuid,
    /// Raw participant token, validated by the handler.
    pub participant_id: String,
    /// Optional display name.
    pub display_name: Option<String>,
    /// The answer.
    pub payload: AnswerPayload,
}

impl Command for SubmitResponse {
    fn command_type(&self) -> &'static str {
        "responses.submit"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command for the moderator to remove one answer.
#[derive(Debug, Clone)]
pub struct DeleteResponse {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session.
    pub session_id: Uuid,
    /// The question.
    pub question_id: Uuid,
    /// Whose answer to remove.
    pub participant_id: String,
}

impl Command for DeleteResponse {
    fn command_type(&self) -> &'static str {
        "responses.delete"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to rebuild a question's counters from its stored answers.
#[derive(Debug, Clone)]
pub struct ResyncTally {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session.
    pub session_id: Uuid,
    /// The question whose tally is rebuilt.
    pub question_id: Uuid,
}

impl Command for ResyncTally {
    fn command_type(&self) -> &'static str {
        "responses.resync_tally"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}
