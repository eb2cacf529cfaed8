use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::db::Election;

use super::{auth::AuthToken, status::GetResultCode};

/// Everything needed to create an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSpec {
    pub name: String,
    /// Voter groups allowed to vote.
    pub groups: Vec<String>,
    /// Choice names, in display order.
    pub choices: Vec<String>,
    pub end_date: DateTime<Utc>,
}

/// An authenticated election creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateElectionRequest {
    #[serde(flatten)]
    pub election: ElectionSpec,
    pub token: AuthToken,
}

/// An authenticated ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub election_name: String,
    pub choice_name: String,
    pub token: AuthToken,
}

/// Tally of a single choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCount {
    pub choice_name: String,
    pub count: u32,
}

/// Outcome of a result query; `counts` is only populated on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResult {
    pub status: GetResultCode,
    #[serde(default)]
    pub counts: Vec<VoteCount>,
}

impl ElectionResult {
    pub fn status(status: GetResultCode) -> Self {
        Self {
            status,
            counts: Vec::new(),
        }
    }
}

impl From<Election> for ElectionResult {
    /// Final tallies, in the order the choices were created.
    fn from(election: Election) -> Self {
        let counts = election
            .election
            .choices
            .into_iter()
            .map(|choice| VoteCount {
                choice_name: choice.name,
                count: choice.votes,
            })
            .collect();
        Self {
            status: GetResultCode::Success,
            counts,
        }
    }
}
