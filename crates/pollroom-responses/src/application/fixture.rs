//! Shared arrangement for the handler tests: a memory store with a session
//! created through the session context's own handlers.

use std::sync::{Arc, Mutex};

use chrono::Duration;
use pollroom_core::error::DomainError;
use pollroom_core::rng::DeterministicRng;
use pollroom_session::application::command_handlers::{
    handle_create_question, handle_create_session, handle_delete_session,
    handle_publish_question,
};
use pollroom_session::domain::aggregates::QuestionKind;
use pollroom_session::domain::commands::{
    CreateQuestion, CreateSession, DeleteSession, PublishQuestion,
};
use pollroom_store::MemoryStore;
use pollroom_test_support::{FixedClock, SequenceRng, SequentialIds, fixed_time};
use uuid::Uuid;

use crate::application::command_handlers::{handle_delete_response, handle_submit_response};
use crate::application::locks::TallyLocks;
use crate::application::repair::TallyRepair;
use crate::domain::answers::{AnswerPayload, DEFAULT_MAX_ANSWER_LENGTH, ParticipantAnswer};
use crate::domain::commands::{DeleteResponse, SubmitResponse};

/// Records scheduled repairs instead of running them.
#[derive(Debug, Default)]
pub(crate) struct RecordingRepair {
    pub(crate) scheduled: Mutex<Vec<(Uuid, Uuid)>>,
}

impl TallyRepair for RecordingRepair {
    fn schedule(&self, session_id: Uuid, question_id: Uuid) {
        self.scheduled.lock().unwrap().push((session_id, question_id));
    }
}

pub(crate) struct Fixture {
    pub(crate) clock: FixedClock,
    pub(crate) ids: SequentialIds,
    pub(crate) rng: Mutex<SequenceRng>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) locks: Arc<TallyLocks>,
    pub(crate) repairs: RecordingRepair,
    pub(crate) session_id: Uuid,
}

impl Fixture {
    /// A fixture with one open session.
    pub(crate) async fn new() -> Self {
        let mut fx = Self {
            clock: FixedClock::stepping(fixed_time(), Duration::seconds(1)),
            ids: SequentialIds::new(),
            rng: Mutex::new(SequenceRng::new((0..32).collect())),
            store: Arc::new(MemoryStore::new()),
            locks: Arc::new(TallyLocks::new()),
            repairs: RecordingRepair::default(),
            session_id: Uuid::nil(),
        };
        let rng: &Mutex<dyn DeterministicRng + Send> = &fx.rng;
        fx.session_id = handle_create_session(
            &CreateSession {
                correlation_id: Uuid::new_v4(),
                title: "Quiz".into(),
            },
            &fx.clock,
            rng,
            &fx.ids,
            fx.store.as_ref(),
        )
        .await
        .unwrap()
        .session_id;
        fx
    }

    pub(crate) async fn question(
        &self,
        kind: QuestionKind,
        options: &[&str],
        correct_index: Option<u32>,
    ) -> Uuid {
        handle_create_question(
            &CreateQuestion {
                correlation_id: Uuid::new_v4(),
                session_id: self.session_id,
                kind,
                text: "Prompt".into(),
                options: options.iter().map(|s| (*s).to_owned()).collect(),
                correct_index,
            },
            &self.clock,
            &self.ids,
            self.store.as_ref(),
        )
        .await
        .unwrap()
        .id
    }

    /// A published "2+2?" question with options 3, 4, 5 and key 4.
    pub(crate) async fn live_mcq(&self) -> Uuid {
        let question_id = self
            .question(QuestionKind::MultipleChoice, &["3", "4", "5"], Some(1))
            .await;
        self.publish(question_id).await;
        question_id
    }

    pub(crate) async fn publish(&self, question_id: Uuid) {
        handle_publish_question(
            &PublishQuestion {
                correlation_id: Uuid::new_v4(),
                session_id: self.session_id,
                question_id,
            },
            self.store.as_ref(),
        )
        .await
        .unwrap();
    }

    pub(crate) fn submit_command(
        &self,
        question_id: Uuid,
        participant_id: &str,
        payload: AnswerPayload,
    ) -> SubmitResponse {
        SubmitResponse {
            correlation_id: Uuid::new_v4(),
            session_id: self.session_id,
            question_id,
            participant_id: participant_id.to_owned(),
            display_name: None,
            payload,
        }
    }

    pub(crate) async fn submit(
        &self,
        question_id: Uuid,
        participant_id: &str,
        payload: AnswerPayload,
    ) -> Result<ParticipantAnswer, DomainError> {
        handle_submit_response(
            &self.submit_command(question_id, participant_id, payload),
            &self.clock,
            self.store.as_ref(),
            &self.locks,
            &self.repairs,
            DEFAULT_MAX_ANSWER_LENGTH,
        )
        .await
    }

    pub(crate) async fn delete_answer(
        &self,
        question_id: Uuid,
        participant_id: &str,
    ) -> Result<Option<ParticipantAnswer>, DomainError> {
        handle_delete_response(
            &DeleteResponse {
                correlation_id: Uuid::new_v4(),
                session_id: self.session_id,
                question_id,
                participant_id: participant_id.to_owned(),
            },
            self.store.as_ref(),
            &self.locks,
            &self.repairs,
        )
        .await
    }

    pub(crate) async fn delete_session(&self) {
        handle_delete_session(
            &DeleteSession {
                correlation_id: Uuid::new_v4(),
                session_id: self.session_id,
            },
            self.store.as_ref(),
        )
        .await
        .unwrap();
    }
}
