use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{api::election::ElectionSpec, mongodb::Id};

/// A choice and its running tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub name: String,
    pub votes: u32,
}

/// Core election data, as stored in the database.
///
/// Groups, choices and the names of voters who have already voted are embedded,
/// so that recording a vote is a single atomic document update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewElection {
    /// Unique election name.
    pub name: String,
    /// Voting is open strictly before this instant.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
    /// Voter groups allowed to vote, in creation order.
    pub groups: Vec<String>,
    /// Choices and tallies, in creation order.
    pub choices: Vec<Choice>,
    /// Names of voters who have cast a ballot.
    pub voted: Vec<String>,
}

impl NewElection {
    /// Is voting still open at the given instant?
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        now < self.end_time
    }

    /// Is the given voter group allowed to vote?
    pub fn allows_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Does the election offer the given choice?
    pub fn has_choice(&self, choice: &str) -> bool {
        self.choices.iter().any(|c| c.name == choice)
    }
}

impl From<ElectionSpec> for NewElection {
    /// Build a fresh election with zeroed tallies.
    /// Repeated groups or choices are collapsed, keeping the first occurrence.
    fn from(spec: ElectionSpec) -> Self {
        let mut groups: Vec<String> = Vec::with_capacity(spec.groups.len());
        for group in spec.groups {
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        let mut choices: Vec<Choice> = Vec::with_capacity(spec.choices.len());
        for name in spec.choices {
            if !choices.iter().any(|c| c.name == name) {
                choices.push(Choice { name, votes: 0 });
            }
        }
        Self {
            name: spec.name,
            end_time: spec.end_date,
            groups,
            choices,
            voted: Vec::new(),
        }
    }
}

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: NewElection,
}

impl Deref for Election {
    type Target = NewElection;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}
