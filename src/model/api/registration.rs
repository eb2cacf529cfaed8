use serde::{Deserialize, Serialize};

use crate::model::db::NewVoter;

/// A request to register a voter together with their signature verification key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRegistration {
    pub name: String,
    pub group: String,
    /// Raw Ed25519 public key.
    #[serde(with = "super::hex")]
    pub public_key: Vec<u8>,
}

impl VoterRegistration {
    /// Split into the database record and the key material.
    pub fn into_parts(self) -> (NewVoter, Vec<u8>) {
        let voter = NewVoter {
            name: self.name,
            group: self.group,
        };
        (voter, self.public_key)
    }
}
