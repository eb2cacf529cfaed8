//! DB-compatible (e.g. de/serialisable) types.
//!
//! The types in this module are serialised in a DB-friendly way, e.g.
//! IDs and datetimes use MongoDB's own formats.

pub mod challenge;
pub mod election;
pub mod voter;

pub use challenge::{Challenge, NewChallenge};
pub use election::{Choice, Election, NewElection};
pub use voter::{NewVoter, Voter};
