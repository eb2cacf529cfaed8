//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - Byte strings (keys, signatures) are serialised as hex strings.
//! - Outcome codes are serialised as integers.

pub mod auth;
pub mod election;
pub(crate) mod hex;
pub mod registration;
pub mod status;
pub mod sync;
