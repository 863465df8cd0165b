//! Command handlers for the responses context.
//!
//! Exactly-once acceptance rests on one create-if-absent per
//! (session, question, participant). Counters are touched only by atomic
//! increments, and only by the caller that won that create (or, on delete,
//! the caller the store handed the removed row to). A row change and its
//! increments happen under the question's shared tally lock; resync takes
//! that lock exclusively.

use pollroom_core::clock::Clock;
use pollroom_core::error::DomainError;
use pollroom_core::keys;
use pollroom_core::store::{self, KeyPath, KeyValueStore};
use pollroom_session::application::persistence::{load_question, load_session, load_state};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::locks::TallyLocks;
use crate::application::repair::TallyRepair;
use crate::domain::answers::{ParticipantAnswer, ParticipantId, display_name};
use crate::domain::commands::{DeleteResponse, ResyncTally, SubmitResponse};
use crate::domain::tally::Tally;

/// Attempts per counter increment before the answer is left for repair.
pub const MAX_INCREMENT_ATTEMPTS: usize = 3;

/// Applies `delta` to a counter, retrying transient failures. Returns
/// whether the increment landed.
async fn bump(store: &dyn KeyValueStore, key: &KeyPath, delta: i64) -> bool {
    for attempt in 1..=MAX_INCREMENT_ATTEMPTS {
        match store.increment(key, delta).await {
            Ok(_) => return true,
            Err(e) => debug!(%key, attempt, error = %e, "counter increment failed"),
        }
    }
    false
}

/// Moves the counters of one answer by `delta` (+1 on accept, -1 on
/// delete). Schedules a repair if either counter could not be moved.
async fn adjust_tally(
    store: &dyn KeyValueStore,
    repairs: &dyn TallyRepair,
    answer: &ParticipantAnswer,
    delta: i64,
) {
    let Some(slot) = answer.tally_slot else {
        return;
    };
    let (session_id, question_id) = (answer.session_id, answer.question_id);
    let count_ok = bump(store, &keys::tally_count(session_id, question_id, slot), delta).await;
    let total_ok = bump(store, &keys::tally_total(session_id, question_id), delta).await;
    if !(count_ok && total_ok) {
        warn!(
            %session_id,
            %question_id,
            slot,
            "tally increment kept failing; scheduling resync"
        );
        repairs.schedule(session_id, question_id);
    }
}

/// Removes whatever a write may have left behind after the session record
/// disappeared under it. Returns whether the session was gone.
async fn purge_if_deleted(
    store: &dyn KeyValueStore,
    session_id: Uuid,
) -> Result<bool, DomainError> {
    if load_state(store, session_id).await?.is_some() {
        return Ok(false);
    }
    let mut removed = 0;
    for prefix in keys::session_subtrees(session_id) {
        removed += store.remove_prefix(&prefix).await?;
    }
    if removed > 0 {
        info!(%session_id, removed, "purged rows written during session deletion");
    }
    Ok(true)
}

/// Handles the `SubmitResponse` command.
///
/// Validates the request, checks that the question is the session's live
/// one, claims the answer row and counts it. A failed counter update does
/// not reject the answer; the tally is repaired later through `repairs`.
///
/// # Errors
///
/// Returns `DomainError::Validation` for malformed input or a payload that
/// does not fit the question, `DomainError::SessionClosed` if the session is
/// closed or gone (including deleted mid-request),
/// `DomainError::InvalidQuestion` if the question is not live,
/// `DomainError::AlreadyResponded` for a repeat submission, and
/// `DomainError::Store` if a store call fails.
pub async fn handle_submit_response(
    command: &SubmitResponse,
    clock: &dyn Clock,
    store: &dyn KeyValueStore,
    locks: &TallyLocks,
    repairs: &dyn TallyRepair,
    max_answer_length: usize,
) -> Result<ParticipantAnswer, DomainError> {
    let session_id = command.session_id;
    let question_id = command.question_id;

    let participant = ParticipantId::parse(&command.participant_id)?;
    command.payload.validate_shape(max_answer_length)?;
    let display_name = display_name(command.display_name.as_deref())?;

    let session = match load_session(store, session_id).await {
        Ok(session) => session,
        Err(DomainError::SessionNotFound(_)) => return Err(DomainError::SessionClosed(session_id)),
        Err(e) => return Err(e),
    };
    session.state.ensure_active(session_id)?;
    if !session.is_live(question_id) {
        return Err(DomainError::InvalidQuestion {
            session_id,
            question_id,
        });
    }
    let question = match load_question(store, session_id, question_id).await {
        Ok(question) => question,
        Err(DomainError::QuestionNotFound { .. }) => {
            return Err(DomainError::InvalidQuestion {
                session_id,
                question_id,
            });
        }
        Err(e) => return Err(e),
    };
    let tally_slot = command.payload.tally_slot(&question)?;

    let answer = ParticipantAnswer {
        session_id,
        question_id,
        participant_id: participant.as_str().to_owned(),
        display_name,
        payload: command.payload.clone(),
        tally_slot,
        submitted_at: clock.now(),
    };
    let key = keys::answer(session_id, question_id, participant.as_str());
    let counting = locks.counting(session_id, question_id).await;
    if !store
        .create_if_absent(&key, store::encode(&key, &answer)?)
        .await?
    {
        debug!(%session_id, %question_id, participant = %participant.as_str(), "duplicate answer");
        return Err(DomainError::AlreadyResponded {
            question_id,
            participant_id: answer.participant_id,
        });
    }
    adjust_tally(store, repairs, &answer, 1).await;
    drop(counting);

    if purge_if_deleted(store, session_id).await? {
        return Err(DomainError::SessionClosed(session_id));
    }

    info!(
        %session_id,
        %question_id,
        participant = %answer.participant_id,
        correlation_id = %command.correlation_id,
        "answer accepted"
    );
    Ok(answer)
}

/// Handles the `DeleteResponse` command: removes one answer and reverses
/// exactly the counters it incremented. Deleting an absent answer succeeds
/// and changes nothing.
///
/// Returns the removed answer, if there was one.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a malformed participant token and
/// `DomainError::Store` if a store call fails.
pub async fn handle_delete_response(
    command: &DeleteResponse,
    store: &dyn KeyValueStore,
    locks: &TallyLocks,
    repairs: &dyn TallyRepair,
) -> Result<Option<ParticipantAnswer>, DomainError> {
    let participant = ParticipantId::parse(&command.participant_id)?;
    let key = keys::answer(command.session_id, command.question_id, participant.as_str());

    let counting = locks.counting(command.session_id, command.question_id).await;
    // Only the caller the store hands the row to may reverse its counters.
    let Some(raw) = store.remove(&key).await? else {
        debug!(%key, "answer already absent");
        return Ok(None);
    };
    let answer: ParticipantAnswer = store::decode(&key, raw)?;
    adjust_tally(store, repairs, &answer, -1).await;
    drop(counting);
    purge_if_deleted(store, command.session_id).await?;

    info!(
        session_id = %command.session_id,
        question_id = %command.question_id,
        participant = %answer.participant_id,
        correlation_id = %command.correlation_id,
        "answer deleted"
    );
    Ok(Some(answer))
}

/// Handles the `ResyncTally` command: recomputes a closed question's tally
/// from its stored answers and corrects each counter by the difference.
///
/// Holds the question's tally lock exclusively from the first read to the
/// last correction, so no answer lands or leaves between the fold and the
/// counters it is compared with.
///
/// # Errors
///
/// Returns `DomainError::SessionNotFound` or `DomainError::QuestionNotFound`
/// for unknown targets, `DomainError::Validation` for open-ended questions,
/// `DomainError::SessionClosed` if the session was deleted meanwhile, and
/// `DomainError::Store` if a store call fails.
pub async fn handle_resync_tally(
    command: &ResyncTally,
    store: &dyn KeyValueStore,
    locks: &TallyLocks,
) -> Result<Tally, DomainError> {
    let session_id = command.session_id;
    let question_id = command.question_id;
    load_session(store, session_id).await?;
    let question = load_question(store, session_id, question_id).await?;
    if !question.kind.is_closed() {
        return Err(DomainError::Validation(
            "open-ended questions have no tally".into(),
        ));
    }

    let exclusive = locks.exclusive(session_id, question_id).await;
    let answers = store
        .list(&keys::question_answers(session_id, question_id))
        .await?
        .into_iter()
        .map(|(key, value)| store::decode::<ParticipantAnswer>(&key, value))
        .collect::<Result<Vec<_>, _>>()?;
    let expected = Tally::fold(&answers);
    let tally_key = keys::question_tally(session_id, question_id);
    let current = Tally::from_counters(store.list(&tally_key).await?)?;

    let deltas = current.deltas_to(&expected);
    for (slot, delta) in &deltas {
        let key = match slot {
            Some(slot) => keys::tally_count(session_id, question_id, *slot),
            None => keys::tally_total(session_id, question_id),
        };
        store.increment(&key, *delta).await?;
    }
    drop(exclusive);

    if purge_if_deleted(store, session_id).await? {
        return Err(DomainError::SessionClosed(session_id));
    }

    info!(
        %session_id,
        %question_id,
        corrections = deltas.len(),
        correlation_id = %command.correlation_id,
        "tally resynced"
    );
    let repaired = Tally::from_counters(store.list(&tally_key).await?)?;
    Ok(repaired.without_zeros())
}
