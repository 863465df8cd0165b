//! Per-question tallies.
//!
//! A tally is never stored as one value. Each option count and the total is
//! its own counter key, incremented independently, and the tally is whatever
//! those counters add up to.

use std::collections::BTreeMap;

use pollroom_core::error::StoreError;
use pollroom_core::store::KeyPath;
use serde::Serialize;
use serde_json::Value;

use super::answers::ParticipantAnswer;

/// Option counts and total for one closed question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    /// Count per option index. Zero counts are omitted.
    pub counts: BTreeMap<u32, i64>,
    /// Number of accepted answers.
    pub total: i64,
}

impl Tally {
    /// The tally the stored answers imply.
    pub fn fold<'a>(answers: impl IntoIterator<Item = &'a ParticipantAnswer>) -> Self {
        let mut tally = Self::default();
        for answer in answers {
            tally.total += 1;
            if let Some(slot) = answer.tally_slot {
                *tally.counts.entry(slot).or_default() += 1;
            }
        }
        tally
    }

    /// Reads a tally from the counter keys listed under a question's tally
    /// root. Zero counters are kept so a repair can see them; call
    /// [`Tally::without_zeros`] before showing the result.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Corrupt` if a counter is not an integer.
    pub fn from_counters(rows: Vec<(KeyPath, Value)>) -> Result<Self, StoreError> {
        let mut tally = Self::default();
        for (key, value) in rows {
            let count = value.as_i64().ok_or_else(|| StoreError::Corrupt {
                key: key.to_string(),
                reason: format!("expected an integer counter, found {value}"),
            })?;
            let segments: Vec<&str> = key.segments().collect();
            match segments.as_slice() {
                [.., "total"] => tally.total = count,
                [.., "counts", slot] => {
                    let slot = slot.parse().map_err(|_| StoreError::Corrupt {
                        key: key.to_string(),
                        reason: "counter slot is not an option index".into(),
                    })?;
                    tally.counts.insert(slot, count);
                }
                _ => {}
            }
        }
        Ok(tally)
    }

    /// Drops zero counts, so a fully reverted question reads as
    /// `{counts: {}, total: 0}`.
    #[must_use]
    pub fn without_zeros(mut self) -> Self {
        self.counts.retain(|_, count| *count != 0);
        self
    }

    /// Per-counter corrections that turn `self` into `target`: option slots
    /// first, then `None` for the total.
    #[must_use]
    pub fn deltas_to(&self, target: &Tally) -> Vec<(Option<u32>, i64)> {
        let mut slots: Vec<u32> = self.counts.keys().chain(target.counts.keys()).copied().collect();
        slots.sort_unstable();
        slots.dedup();

        let mut deltas: Vec<(Option<u32>, i64)> = slots
            .into_iter()
            .filter_map(|slot| {
                let have = self.counts.get(&slot).copied().unwrap_or_default();
                let want = target.counts.get(&slot).copied().unwrap_or_default();
                (have != want).then_some((Some(slot), want - have))
            })
            .collect();
        if self.total != target.total {
            deltas.push((None, target.total - self.total));
        }
        deltas
    }
}
