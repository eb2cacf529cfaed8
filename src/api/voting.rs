use chrono::Utc;
use mongodb::{bson::doc, options::UpdateOptions};
use rocket::{serde::json::Json, Route, State};

use crate::{
    cluster::{PrimaryOnly, Replicator},
    error::{Error, Result},
    model::{
        api::{
            election::{CreateElectionRequest, ElectionResult, Vote},
            status::{CastVoteCode, CreateElectionCode, GetResultCode, Reply},
        },
        db::{Election, NewElection, Voter},
        keys::ServerKeys,
        mongodb::{is_duplicate_key_error, Coll},
    },
};

pub fn routes() -> Vec<Route> {
    routes![create_election, cast_vote, get_result]
}

#[post("/voting/elections", data = "<request>", format = "json")]
async fn create_election(
    _primary: PrimaryOnly,
    request: Json<CreateElectionRequest>,
    elections: Coll<NewElection>,
    server_keys: &State<ServerKeys>,
    replicator: &State<Replicator>,
) -> Result<Json<Reply<CreateElectionCode>>> {
    let CreateElectionRequest { election, token } = request.0;
    let creator = match server_keys.verify_token(&token) {
        Ok(subject) => subject,
        Err(e) => {
            debug!("Refusing election {}: {e}", election.name);
            return Ok(Json(Reply::new(CreateElectionCode::Unauthn)));
        }
    };
    if election.groups.is_empty() || election.choices.is_empty() {
        return Ok(Json(Reply::new(CreateElectionCode::NoSpec)));
    }

    let election = NewElection::from(election);
    match elections.insert_one(&election, None).await {
        Ok(_) => {}
        Err(e) if is_duplicate_key_error(&e) => {
            warn!("Election {} already exists", election.name);
            return Ok(Json(Reply::new(CreateElectionCode::Unknown)));
        }
        Err(e) => {
            error!("Cannot insert election {}: {e}", election.name);
            return Ok(Json(Reply::new(CreateElectionCode::Unknown)));
        }
    }
    replicator.sync_to_backups();

    info!(
        "{creator} created election {} for groups {:?}, closing {}",
        election.name, election.groups, election.end_time
    );
    Ok(Json(Reply::new(CreateElectionCode::Success)))
}

#[post("/voting/votes", data = "<vote>", format = "json")]
async fn cast_vote(
    _primary: PrimaryOnly,
    vote: Json<Vote>,
    elections: Coll<Election>,
    voters: Coll<Voter>,
    server_keys: &State<ServerKeys>,
    replicator: &State<Replicator>,
) -> Result<Json<Reply<CastVoteCode>>> {
    let Vote {
        election_name,
        choice_name,
        token,
    } = vote.0;
    let Ok(user) = server_keys.verify_token(&token) else {
        return Ok(Json(Reply::new(CastVoteCode::Unauthn)));
    };

    let Some(election) = elections
        .find_one(doc! { "name": &election_name }, None)
        .await?
    else {
        return Ok(Json(Reply::new(CastVoteCode::NotFound)));
    };
    if !election.is_open(Utc::now()) {
        return Err(Error::voting_ended(&election_name));
    }

    // Tokens outlive unregistration.
    let Some(voter) = voters.find_one(doc! { "name": &user }, None).await? else {
        return Ok(Json(Reply::new(CastVoteCode::Unauthn)));
    };
    if !election.allows_group(&voter.group) {
        debug!("Group {} may not vote in {election_name}", voter.group);
        return Ok(Json(Reply::new(CastVoteCode::Unauthz)));
    }
    if !election.has_choice(&choice_name) {
        return Err(Error::not_found(format!(
            "Choice {choice_name} in election {election_name}"
        )));
    }

    if !record_vote(&elections, &election, &user, &choice_name).await? {
        // Either a repeat vote or the election closed since it was read.
        let closed = elections
            .find_one(election.id.as_doc(), None)
            .await?
            .map_or(true, |current| !current.is_open(Utc::now()));
        if closed {
            return Err(Error::voting_ended(&election_name));
        }
        return Ok(Json(Reply::new(CastVoteCode::Already)));
    }
    replicator.sync_to_backups();

    Ok(Json(Reply::new(CastVoteCode::Success)))
}

/// Check, count and record a vote in one document update. Matches nothing
/// once `user` has voted or the election has closed.
async fn record_vote(
    elections: &Coll<Election>,
    election: &Election,
    user: &str,
    choice: &str,
) -> Result<bool> {
    let now = mongodb::bson::DateTime::from_chrono(Utc::now());
    let filter = doc! {
        "_id": *election.id,
        "end_time": { "$gt": now },
        "voted": { "$ne": user },
    };
    let update = doc! {
        "$inc": { "choices.$[chosen].votes": 1 },
        "$push": { "voted": user },
    };
    let options = UpdateOptions::builder()
        .array_filters(vec![doc! { "chosen.name": choice }])
        .build();
    let result = elections.update_one(filter, update, options).await?;
    Ok(result.matched_count == 1)
}

#[get("/voting/elections/<name>/result")]
async fn get_result(name: &str, elections: Coll<Election>) -> Result<Json<ElectionResult>> {
    let Some(election) = elections.find_one(doc! { "name": name }, None).await? else {
        return Ok(Json(ElectionResult::status(GetResultCode::NotFound)));
    };
    if election.is_open(Utc::now()) {
        return Ok(Json(ElectionResult::status(GetResultCode::NotYet)));
    }
    Ok(Json(election.into()))
}
