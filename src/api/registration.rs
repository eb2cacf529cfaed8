use ed25519_dalek::VerifyingKey;
use mongodb::bson::doc;
use rocket::{serde::json::Json, Route, State};

use crate::{
    cluster::{PrimaryOnly, Replicator},
    error::Result,
    model::{
        api::{
            registration::VoterRegistration,
            status::{RegisterVoterCode, Reply, UnregisterVoterCode},
            sync::VoterKey,
        },
        db::NewVoter,
        keys::KeyStore,
        mongodb::{is_duplicate_key_error, Coll},
    },
};

pub fn routes() -> Vec<Route> {
    routes![register_voter, unregister_voter]
}

#[post("/registration/voters", data = "<registration>", format = "json")]
async fn register_voter(
    _primary: PrimaryOnly,
    registration: Json<VoterRegistration>,
    voters: Coll<NewVoter>,
    keys: &State<KeyStore>,
    replicator: &State<Replicator>,
) -> Result<Json<Reply<RegisterVoterCode>>> {
    let (voter, public_key) = registration.0.into_parts();
    if VerifyingKey::try_from(public_key.as_slice()).is_err() {
        warn!("Rejecting voter {} with a malformed public key", voter.name);
        return Ok(Json(Reply::new(RegisterVoterCode::Unknown)));
    }
    if let Err(e) = KeyStore::check_name(&voter.name) {
        warn!("{e}");
        return Ok(Json(Reply::new(RegisterVoterCode::Unknown)));
    }

    match voters.insert_one(&voter, None).await {
        Ok(_) => {}
        Err(e) if is_duplicate_key_error(&e) => {
            return Ok(Json(Reply::new(RegisterVoterCode::Exists)));
        }
        Err(e) => {
            error!("Cannot insert voter {}: {e}", voter.name);
            return Ok(Json(Reply::new(RegisterVoterCode::Unknown)));
        }
    }
    replicator.sync_to_backups();

    if let Err(e) = keys.write(&voter.name, &public_key).await {
        error!("Cannot store key of voter {}: {e}", voter.name);
        // Without a key the voter could never authenticate.
        voters.delete_one(doc! { "name": &voter.name }, None).await?;
        replicator.sync_to_backups();
        return Ok(Json(Reply::new(RegisterVoterCode::Unknown)));
    }
    let key = VoterKey {
        name: voter.name,
        key: public_key,
    };
    replicator.sync_key_to_backups(&key);

    info!("Registered voter {} in group {}", key.name, voter.group);
    Ok(Json(Reply::new(RegisterVoterCode::Success)))
}

#[delete("/registration/voters/<name>")]
async fn unregister_voter(
    _primary: PrimaryOnly,
    name: &str,
    voters: Coll<NewVoter>,
    keys: &State<KeyStore>,
    replicator: &State<Replicator>,
) -> Result<Json<Reply<UnregisterVoterCode>>> {
    let deleted = match voters.delete_one(doc! { "name": name }, None).await {
        Ok(result) => result.deleted_count,
        Err(e) => {
            error!("Cannot delete voter {name}: {e}");
            return Ok(Json(Reply::new(UnregisterVoterCode::Unknown)));
        }
    };
    if deleted == 0 {
        return Ok(Json(Reply::new(UnregisterVoterCode::NotFound)));
    }

    // Backups keep their copy of the key file, which is harmless without the voter row.
    if let Err(e) = keys.remove(name).await {
        warn!("Cannot remove key of voter {name}: {e}");
    }
    replicator.sync_to_backups();

    info!("Unregistered voter {name}");
    Ok(Json(Reply::new(UnregisterVoterCode::Success)))
}
