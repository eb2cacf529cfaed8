use std::ops::Deref;

use data_encoding::HEXLOWER;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Number of random bytes in a challenge nonce.
pub const CHALLENGE_BYTES: usize = 16;

/// A pending authentication challenge, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChallenge {
    /// The voter the challenge was issued to.
    pub name: String,
    /// Hex-encoded nonce the voter must sign.
    pub value: String,
}

impl NewChallenge {
    /// Create a challenge with a fresh nonce from the OS RNG.
    ///
    /// Panics if the OS cannot provide randomness.
    pub fn random(name: impl Into<String>) -> Self {
        let mut nonce = [0; CHALLENGE_BYTES];
        OsRng.fill_bytes(&mut nonce);
        Self {
            name: name.into(),
            value: HEXLOWER.encode(&nonce),
        }
    }
}

/// A challenge from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub challenge: NewChallenge,
}

impl Deref for Challenge {
    type Target = NewChallenge;

    fn deref(&self) -> &Self::Target {
        &self.challenge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_challenges_are_hex_and_distinct() {
        let first = NewChallenge::random("alice");
        let second = NewChallenge::random("alice");

        assert_eq!(first.value.len(), CHALLENGE_BYTES * 2);
        assert!(first
            .value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_ne!(first.value, second.value);
        assert_eq!(first.name, "alice");
    }
}
