use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core voter data, as stored in the database.
/// The voter's public key lives in the key store, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVoter {
    /// Unique voter name.
    pub name: String,
    /// Membership tag checked against each election's allowed groups.
    pub group: String,
}

/// A voter from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: NewVoter,
}

impl Deref for Voter {
    type Target = NewVoter;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}
