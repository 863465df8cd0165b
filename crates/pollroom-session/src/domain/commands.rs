//! Commands for the session context.

use pollroom_core::command::Command;
use uuid::Uuid;

use super::aggregates::QuestionKind;

/// Command to open a new session.
#[derive(Debug, Clone)]
pub struct CreateSession {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Session title.
    pub title: String,
}

impl Command for CreateSession {
    fn command_type(&self) -> &'static str {
        "session.create_session"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to add a question to a session.
#[derive(Debug, Clone)]
pub struct CreateQuestion {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The owning session.
    pub session_id: Uuid,
    /// Question kind.
    pub kind: QuestionKind,
    /// Prompt text.
    pub text: String,
    /// Option labels; empty for open-ended questions.
    pub options: Vec<String>,
    /// Correct option; multiple-choice only.
    pub correct_index: Option<u32>,
}

impl Command for CreateQuestion {
    fn command_type(&self) -> &'static str {
        "session.create_question"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to make a question the live one.
#[derive(Debug, Clone)]
pub struct PublishQuestion {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session.
    pub session_id: Uuid,
    /// The question to present.
    pub question_id: Uuid,
}

impl Command for PublishQuestion {
    fn command_type(&self) -> &'static str {
        "session.publish_question"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to close a session.
#[derive(Debug, Clone)]
pub struct CloseSession {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session to close.
    pub session_id: Uuid,
}

impl Command for CloseSession {
    fn command_type(&self) -> &'static str {
        "session.close_session"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to delete a session and everything it owns.
#[derive(Debug, Clone)]
pub struct DeleteSession {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session to delete.
    pub session_id: Uuid,
}

impl Command for DeleteSession {
    fn command_type(&self) -> &'static str {
        "session.delete_session"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_types_are_namespaced() {
        let correlation_id = Uuid::new_v4();
        let publish = PublishQuestion {
            correlation_id,
            session_id: Uuid::new_v4(),
            question_id: Uuid::new_v4(),
        };
        let delete = DeleteSession {
            correlation_id,
            session_id: Uuid::new_v4(),
        };

        assert_eq!(publish.command_type(), "session.publish_question");
        assert_eq!(delete.command_type(), "session.delete_session");
        assert_eq!(publish.correlation_id(), correlation_id);
    }
}
