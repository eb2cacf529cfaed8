use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use mongodb::bson::doc;
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::{
    cluster::{PrimaryOnly, Replicator},
    config::Config,
    error::{Error, Result},
    model::{
        api::auth::{AuthRequest, AuthToken, Challenge as ChallengeReply, PreAuthRequest},
        db::{Challenge, NewChallenge, Voter},
        keys::{KeyStore, ServerKeys},
        mongodb::Coll,
    },
};

pub fn routes() -> Vec<Route> {
    routes![preauth, auth]
}

#[post("/voting/preauth", data = "<request>", format = "json")]
async fn preauth(
    _primary: PrimaryOnly,
    request: Json<PreAuthRequest>,
    voters: Coll<Voter>,
    challenges: Coll<NewChallenge>,
    replicator: &State<Replicator>,
) -> Result<Json<ChallengeReply>> {
    let name = request.0.name;
    voters
        .find_one(doc! { "name": &name }, None)
        .await?
        .ok_or_else(|| Error::unauthenticated("voter not registered"))?;

    // Earlier challenges stay valid.
    let challenge = NewChallenge::random(name);
    challenges.insert_one(&challenge, None).await?;
    replicator.sync_to_backups();

    Ok(Json(ChallengeReply {
        value: challenge.value,
    }))
}

#[post("/voting/auth", data = "<request>", format = "json")]
async fn auth(
    _primary: PrimaryOnly,
    request: Json<AuthRequest>,
    challenges: Coll<Challenge>,
    keys: &State<KeyStore>,
    server_keys: &State<ServerKeys>,
    replicator: &State<Replicator>,
    config: &State<Config>,
) -> Result<Json<AuthToken>> {
    let AuthRequest { name, response } = request.0;
    let key = voter_key(keys, &name).await?;
    let signature = Signature::from_slice(&response)
        .map_err(|_| Error::unauthenticated("unknown signature"))?;

    let pending: Vec<Challenge> = challenges
        .find(doc! { "name": &name }, None)
        .await?
        .try_collect()
        .await?;
    for challenge in pending {
        if key.verify(challenge.value.as_bytes(), &signature).is_err() {
            continue;
        }
        // A concurrent request may have used this challenge already.
        let used = challenges.delete_one(challenge.id.as_doc(), None).await?;
        if used.deleted_count == 0 {
            continue;
        }
        replicator.sync_to_backups();

        let token = server_keys.issue_token(&name, config.auth_ttl())?;
        debug!("Issued token to {name}");
        return Ok(Json(token));
    }

    Err(Error::unauthenticated("unknown signature"))
}

/// Load a voter's public key, failing authentication if there is none.
async fn voter_key(keys: &KeyStore, name: &str) -> Result<VerifyingKey> {
    if KeyStore::check_name(name).is_err() {
        return Err(Error::unauthenticated("voter not registered"));
    }
    let bytes = keys
        .read(name)
        .await?
        .ok_or_else(|| Error::unauthenticated("voter not registered"))?;
    VerifyingKey::try_from(bytes.as_slice()).map_err(|e| {
        error!("Stored key of voter {name} is unusable: {e}");
        Error::unauthenticated("voter not registered")
    })
}
