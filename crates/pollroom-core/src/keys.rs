//! Store key layout.
//!
//! ```text
//! sessions/{session}/meta
//! sessions/{session}/state
//! codes/{CODE}
//! questions/{session}/{question}
//! answers/{session}/{question}/{participant}
//! tallies/{session}/{question}/total
//! tallies/{session}/{question}/counts/{option}
//! ```
//!
//! Every subtree that belongs to a session starts with the session id right
//! after its root segment, so a cascading delete is one `remove_prefix` per
//! root.

use uuid::Uuid;

use crate::store::KeyPath;

/// Root of all session records.
#[must_use]
pub fn sessions() -> KeyPath {
    KeyPath::root().child("sessions")
}

/// Everything stored for one session record (meta and state).
#[must_use]
pub fn session_root(session_id: Uuid) -> KeyPath {
    sessions().child(session_id)
}

/// Immutable session attributes.
#[must_use]
pub fn session_meta(session_id: Uuid) -> KeyPath {
    session_root(session_id).child("meta")
}

/// Mutable lifecycle state, only ever changed by compare-and-swap.
#[must_use]
pub fn session_state(session_id: Uuid) -> KeyPath {
    session_root(session_id).child("state")
}

/// Join code directory entry.
#[must_use]
pub fn code(code: &str) -> KeyPath {
    KeyPath::root().child("codes").child(code)
}

/// All questions of a session.
#[must_use]
pub fn questions(session_id: Uuid) -> KeyPath {
    KeyPath::root().child("questions").child(session_id)
}

/// One question definition.
#[must_use]
pub fn question(session_id: Uuid, question_id: Uuid) -> KeyPath {
    questions(session_id).child(question_id)
}

/// All answers in a session.
#[must_use]
pub fn answers(session_id: Uuid) -> KeyPath {
    KeyPath::root().child("answers").child(session_id)
}

/// All answers to one question.
#[must_use]
pub fn question_answers(session_id: Uuid, question_id: Uuid) -> KeyPath {
    answers(session_id).child(question_id)
}

/// The composite-key answer row.
#[must_use]
pub fn answer(session_id: Uuid, question_id: Uuid, participant_id: &str) -> KeyPath {
    question_answers(session_id, question_id).child(participant_id)
}

/// All tallies in a session.
#[must_use]
pub fn tallies(session_id: Uuid) -> KeyPath {
    KeyPath::root().child("tallies").child(session_id)
}

/// The counters of one question.
#[must_use]
pub fn question_tally(session_id: Uuid, question_id: Uuid) -> KeyPath {
    tallies(session_id).child(question_id)
}

/// Total accepted answers of one question.
#[must_use]
pub fn tally_total(session_id: Uuid, question_id: Uuid) -> KeyPath {
    question_tally(session_id, question_id).child("total")
}

/// Per-option counter of one question.
#[must_use]
pub fn tally_count(session_id: Uuid, question_id: Uuid, option: u32) -> KeyPath {
    question_tally(session_id, question_id)
        .child("counts")
        .child(option)
}

/// The subtree roots a session owns, in the order a cascade removes them.
///
/// The session record goes first: a writer that checks for it after its own
/// write either sees it gone and cleans up, or wrote early enough for the
/// rest of the cascade to remove the row.
#[must_use]
pub fn session_subtrees(session_id: Uuid) -> [KeyPath; 4] {
    [
        session_root(session_id),
        answers(session_id),
        tallies(session_id),
        questions(session_id),
    ]
}

/// Where a changed key belongs, for routing change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyScope {
    /// Session meta or state.
    Session(Uuid),
    /// A question definition.
    Question(Uuid, Uuid),
    /// An answer row or tally counter of a question.
    Results(Uuid, Uuid),
}

/// Classifies a key from the layout above. Keys outside the layout (and
/// join codes) yield `None`.
#[must_use]
pub fn classify(key: &KeyPath) -> Option<KeyScope> {
    let mut segments = key.segments();
    let root = segments.next()?;
    let session_id = segments.next()?.parse::<Uuid>().ok()?;
    match root {
        "sessions" => Some(KeyScope::Session(session_id)),
        "questions" | "answers" | "tallies" => {
            let question_id = segments.next()?.parse::<Uuid>().ok()?;
            if root == "questions" {
                Some(KeyScope::Question(session_id, question_id))
            } else {
                Some(KeyScope::Results(session_id, question_id))
            }
        }
        _ => None,
    }
}
