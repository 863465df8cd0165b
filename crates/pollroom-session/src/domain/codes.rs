//! Join codes: short, human-typable aliases for session ids.

use std::fmt;

use pollroom_core::error::DomainError;
use pollroom_core::rng::DeterministicRng;
use serde::{Deserialize, Serialize};

/// Characters a code is drawn from. Omits `I`, `O`, `0` and `1`, which are
/// easy to misread when shown on a projector.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of characters in a code.
pub const CODE_LENGTH: usize = 6;

/// A normalized join code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JoinCode(String);

impl JoinCode {
    /// Draws a fresh candidate code. Uniqueness is decided by the store, not
    /// here.
    pub fn generate(rng: &mut dyn DeterministicRng) -> Self {
        let max = u32::try_from(ALPHABET.len() - 1).unwrap_or(u32::MAX);
        let code = (0..CODE_LENGTH)
            .map(|_| {
                let index = rng.next_u32_range(0, max) as usize;
                char::from(ALPHABET[index.min(ALPHABET.len() - 1)])
            })
            .collect();
        Self(code)
    }

    /// Normalizes what a participant typed: surrounding whitespace is
    /// dropped and letters are uppercased.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidCode` if the result is not a
    /// well-formed code, so malformed input never reaches the store.
    pub fn normalize(raw: &str) -> Result<Self, DomainError> {
        let candidate = raw.trim().to_ascii_uppercase();
        let well_formed = candidate.len() == CODE_LENGTH
            && candidate.bytes().all(|b| ALPHABET.contains(&b));
        if well_formed {
            Ok(Self(candidate))
        } else {
            Err(DomainError::InvalidCode(raw.trim().to_owned()))
        }
    }

    /// The code text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
