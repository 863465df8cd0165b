//! Session leaderboard.

use std::collections::HashMap;

use pollroom_session::domain::aggregates::Question;
use serde::Serialize;
use uuid::Uuid;

use super::answers::{ANONYMOUS, ParticipantAnswer};

/// One participant's standing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    /// Participant token.
    pub participant_id: String,
    /// Latest name the participant gave, or `Anonymous`.
    pub display_name: String,
    /// Multiple-choice answers matching the key.
    pub correct_count: u32,
    /// Questions answered.
    pub total_count: u32,
}

/// Ranks participants by correct answers.
///
/// Answers are folded in submission order (ties broken by participant
/// token), so the final sort, which is stable, leaves participants with equal
/// scores in the order they first answered. Answers to questions missing
/// from `questions` count towards `total_count` only.
#[must_use]
pub fn rank(
    mut answers: Vec<ParticipantAnswer>,
    questions: &HashMap<Uuid, Question>,
) -> Vec<LeaderboardEntry> {
    answers.sort_by(|a, b| {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.question_id.cmp(&b.question_id))
            .then_with(|| a.participant_id.cmp(&b.participant_id))
    });

    let mut entries: Vec<LeaderboardEntry> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for answer in answers {
        let index = *positions
            .entry(answer.participant_id.clone())
            .or_insert_with(|| {
                entries.push(LeaderboardEntry {
                    participant_id: answer.participant_id.clone(),
                    display_name: ANONYMOUS.to_owned(),
                    correct_count: 0,
                    total_count: 0,
                });
                entries.len() - 1
            });
        let entry = &mut entries[index];

        entry.total_count += 1;
        let correct = answer.choice().is_some_and(|choice| {
            questions
                .get(&answer.question_id)
                .is_some_and(|question| question.is_correct(choice))
        });
        if correct {
            entry.correct_count += 1;
        }
        if answer.display_name != ANONYMOUS {
            entry.display_name = answer.display_name;
        }
    }

    entries.sort_by(|a, b| b.correct_count.cmp(&a.correct_count));
    entries
}
