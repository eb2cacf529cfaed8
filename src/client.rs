//! A client for the voting API.
//!
//! Tokens are fetched lazily and cached. When a protected call is refused for
//! lack of authentication, the client runs the challenge-response exchange
//! again and retries the call once.

use ed25519_dalek::{Signer, SigningKey};
use reqwest::{StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::model::api::{
    auth::{AuthRequest, AuthToken, Challenge, PreAuthRequest},
    election::{CreateElectionRequest, ElectionResult, ElectionSpec, Vote},
    registration::VoterRegistration,
    status::{CastVoteCode, CreateElectionCode, RegisterVoterCode, Reply, UnregisterVoterCode},
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("server answered {0}")]
    Rejected(StatusCode),
    #[error("invalid server URL `{0}`")]
    BadUrl(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// A voter's connection to one node.
pub struct VotingClient {
    http: reqwest::Client,
    base_url: String,
    name: String,
    key: SigningKey,
    token: Option<AuthToken>,
}

impl VotingClient {
    /// Talk to the node at `base_url` (e.g. `http://10.0.0.1:8000`) as voter `name`.
    pub fn new(base_url: impl Into<String>, name: impl Into<String>, key: SigningKey) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            name: name.into(),
            key,
            token: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register this voter with its own public key.
    pub async fn register(&self, group: &str) -> Result<RegisterVoterCode> {
        let registration = VoterRegistration {
            name: self.name.clone(),
            group: group.to_string(),
            public_key: self.key.verifying_key().to_bytes().to_vec(),
        };
        let reply: Reply<RegisterVoterCode> =
            self.post("/registration/voters", &registration).await?;
        Ok(reply.code)
    }

    pub async fn unregister(&self, name: &str) -> Result<UnregisterVoterCode> {
        let response = self
            .http
            .delete(self.url_with(&["registration", "voters", name])?)
            .send()
            .await?;
        let reply: Reply<UnregisterVoterCode> = decode(response).await?;
        Ok(reply.code)
    }

    /// Run the challenge-response exchange and cache the resulting token.
    pub async fn login(&mut self) -> Result<AuthToken> {
        let request = PreAuthRequest {
            name: self.name.clone(),
        };
        let challenge: Challenge = self.post("/voting/preauth", &request).await?;
        let request = AuthRequest {
            name: self.name.clone(),
            response: self.key.sign(challenge.value.as_bytes()).to_bytes().to_vec(),
        };
        let token: AuthToken = self.post("/voting/auth", &request).await?;
        self.token = Some(token.clone());
        Ok(token)
    }

    pub async fn create_election(&mut self, election: &ElectionSpec) -> Result<CreateElectionCode> {
        self.authorized(
            "/voting/elections",
            |token| CreateElectionRequest {
                election: election.clone(),
                token,
            },
            CreateElectionCode::Unauthn,
        )
        .await
    }

    pub async fn cast_vote(&mut self, election: &str, choice: &str) -> Result<CastVoteCode> {
        self.authorized(
            "/voting/votes",
            |token| Vote {
                election_name: election.to_string(),
                choice_name: choice.to_string(),
                token,
            },
            CastVoteCode::Unauthn,
        )
        .await
    }

    pub async fn result(&self, election: &str) -> Result<ElectionResult> {
        let response = self
            .http
            .get(self.url_with(&["voting", "elections", election, "result"])?)
            .send()
            .await?;
        decode(response).await
    }

    /// Make a protected call, logging in again and retrying once if the
    /// token is refused.
    async fn authorized<B, C>(
        &mut self,
        path: &str,
        body: impl Fn(AuthToken) -> B,
        unauthn: C,
    ) -> Result<C>
    where
        B: Serialize,
        C: DeserializeOwned + PartialEq + Copy,
    {
        let token = match self.token.clone() {
            Some(token) => token,
            None => self.login().await?,
        };
        let first = self.post::<_, Reply<C>>(path, &body(token)).await;
        if !needs_reauth(&first, unauthn) {
            return first.map(|reply| reply.code);
        }

        debug!("Token refused by {path}, authenticating again");
        let token = self.login().await?;
        let reply: Reply<C> = self.post(path, &body(token)).await?;
        Ok(reply.code)
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        decode(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Build a URL from path segments, percent-encoding each one.
    fn url_with(&self, segments: &[&str]) -> Result<Url> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| ClientError::BadUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| ClientError::BadUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R> {
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Rejected(status));
    }
    Ok(response.json().await?)
}

/// Authentication failures come either as a status code or as a 401.
fn needs_reauth<C: PartialEq>(outcome: &Result<Reply<C>>, unauthn: C) -> bool {
    match outcome {
        Ok(reply) => reply.code == unauthn,
        Err(ClientError::Rejected(status)) => *status == StatusCode::UNAUTHORIZED,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::model::{api::election::ElectionSpec, keys::ServerKeys};

    use super::*;

    #[test]
    fn reauth_on_either_authentication_failure() {
        let refused = Ok(Reply::new(CastVoteCode::Unauthn));
        assert!(needs_reauth(&refused, CastVoteCode::Unauthn));

        let unauthorized = Err(ClientError::Rejected(StatusCode::UNAUTHORIZED));
        assert!(needs_reauth(&unauthorized, CastVoteCode::Unauthn));

        let already = Ok(Reply::new(CastVoteCode::Already));
        assert!(!needs_reauth(&already, CastVoteCode::Unauthn));

        let ended = Err(ClientError::Rejected(StatusCode::GONE));
        assert!(!needs_reauth(&ended, CastVoteCode::Unauthn));
    }

    #[test]
    fn base_url_is_normalised() {
        let client = VotingClient::new("http://localhost:8000/", "alice", SigningKey::from_bytes(&[7; 32]));
        assert_eq!(client.url("/sync/ping"), "http://localhost:8000/sync/ping");
        assert_eq!(client.name(), "alice");
    }

    #[test]
    fn names_are_escaped_in_paths() {
        let client = VotingClient::new("http://localhost:8000", "alice", SigningKey::from_bytes(&[7; 32]));
        let url = client
            .url_with(&["voting", "elections", "a/b?c#d", "result"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/voting/elections/a%2Fb%3Fc%23d/result"
        );

        let bad = VotingClient::new("not a url", "alice", SigningKey::from_bytes(&[7; 32]));
        assert!(matches!(bad.url_with(&["x"]), Err(ClientError::BadUrl(_))));
    }

    #[rocket::async_test]
    async fn refused_token_is_replaced_and_call_retried() {
        let address = crate::free_address();
        let db_client = crate::db_client().await;
        let db_name = crate::database();
        let data_dir = crate::data_dir();
        let shutdown = crate::launch(crate::rocket_at(
            &address,
            db_client.clone(),
            &db_name,
            &data_dir,
            None,
        ))
        .await;

        let registration = VoterRegistration::example();
        let election = ElectionSpec::example();
        let mut client = VotingClient::new(
            format!("http://{address}"),
            registration.name.clone(),
            VoterRegistration::example_key(),
        );
        assert_eq!(client.register(&registration.group).await.unwrap(), RegisterVoterCode::Success);
        assert_eq!(
            client.create_election(&election).await.unwrap(),
            CreateElectionCode::Success
        );

        // An expired token signed by the node itself.
        let server_keys = ServerKeys::load_or_generate(&data_dir).await.unwrap();
        let expired = server_keys
            .issue_token(&registration.name, Duration::seconds(-1))
            .unwrap();
        client.token = Some(expired.clone());
        assert_eq!(
            client.cast_vote(&election.name, "yes").await.unwrap(),
            CastVoteCode::Success
        );
        let fresh = client.token.clone().unwrap();
        assert_ne!(fresh.value, expired.value);
        assert_eq!(server_keys.verify_token(&fresh).unwrap(), registration.name);

        // Refusals other than authentication keep the cached token.
        assert_eq!(
            client.cast_vote(&election.name, "no").await.unwrap(),
            CastVoteCode::Already
        );
        assert_eq!(client.token.as_ref().unwrap().value, fresh.value);

        shutdown.notify();
        db_client.database(&db_name).drop(None).await.unwrap();
        rocket::tokio::fs::remove_dir_all(data_dir).await.unwrap();
    }
}
