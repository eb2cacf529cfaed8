//! Business outcomes, returned inside a successful reply.
//!
//! Codes are serialised as integers. Conditions the protocol treats as
//! exceptional travel as HTTP error statuses instead, see [`crate::error::Error`].

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// A reply carrying nothing but an outcome code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply<C> {
    pub code: C,
}

impl<C> Reply<C> {
    pub fn new(code: C) -> Self {
        Self { code }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RegisterVoterCode {
    Success = 0,
    Exists = 1,
    Unknown = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum UnregisterVoterCode {
    Success = 0,
    NotFound = 1,
    Unknown = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum CreateElectionCode {
    Success = 0,
    Unauthn = 1,
    NoSpec = 2,
    Unknown = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum CastVoteCode {
    Success = 0,
    Unauthn = 1,
    NotFound = 2,
    Unauthz = 3,
    Already = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum GetResultCode {
    Success = 0,
    NotFound = 1,
    NotYet = 2,
}

impl Display for RegisterVoterCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Success => "voter registered",
            Self::Exists => "voter with the same name already exists",
            Self::Unknown => "undefined error",
        })
    }
}

impl Display for UnregisterVoterCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Success => "voter unregistered",
            Self::NotFound => "no voter with the name exists on the server",
            Self::Unknown => "undefined error",
        })
    }
}

impl Display for CreateElectionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Success => "election created",
            Self::Unauthn => "invalid authentication token",
            Self::NoSpec => "missing groups or choices specification",
            Self::Unknown => "unknown error",
        })
    }
}

impl Display for CastVoteCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Success => "vote cast",
            Self::Unauthn => "invalid authentication token",
            Self::NotFound => "invalid election name",
            Self::Unauthz => "the voter's group is not allowed in the election",
            Self::Already => "a previous vote has been cast",
        })
    }
}

impl Display for GetResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Success => "results available",
            Self::NotFound => "non-existent election",
            Self::NotYet => "the election is still ongoing, results are not available yet",
        })
    }
}
