use jsonwebtoken::errors::Error as JwtError;
use mongodb::error::Error as DbError;
use reqwest::Error as PeerError;
use rocket::{http::Status, response::Responder};
use std::io::Error as IoError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    /// The caller could not be authenticated.
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::Status(Status::Unauthorized, reason.into())
    }

    /// The named resource does not exist.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Status(Status::NotFound, format!("Not found: {}", what.into()))
    }

    /// This node is a backup and cannot serve the request.
    pub fn not_primary() -> Self {
        Self::Status(Status::ServiceUnavailable, "i'm not primary".to_string())
    }

    /// Voting on a closed election.
    pub fn voting_ended(election: &str) -> Self {
        Self::Status(Status::Gone, format!("Voting in {election} has ended"))
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        Err(match self {
            Self::Status(status, msg) => {
                warn!("{status}: {msg}");
                status
            }
            other => {
                error!("Internal error: {other}");
                Status::InternalServerError
            }
        })
    }
}
