use mongodb::Database;
use rocket::{serde::json::Json, Route, State};

use crate::{
    cluster::{halt, Membership, PrimaryOnly, Replicator},
    error::Result,
    model::{
        api::sync::{Dump, NodeIdentifier, NodesList, StoreDump, VoterKey},
        keys::{KeyStore, ServerKeys},
        mongodb::restore_database,
    },
};

pub fn routes() -> Vec<Route> {
    routes![join, nodes_changed, restore, new_key, ping]
}

/// Admit a new backup and hand it our complete state.
#[post("/sync/join", data = "<node>", format = "json")]
async fn join(
    _primary: PrimaryOnly,
    node: Json<NodeIdentifier>,
    server_keys: &State<ServerKeys>,
    replicator: &State<Replicator>,
) -> Result<Json<Dump>> {
    let address = node.0.address;
    let dump = replicator.admit(&address, server_keys).await?;
    // The joining node learns the topology from the dump itself.
    replicator.notify_nodes_changed(Some(&address));
    Ok(Json(dump))
}

#[post("/sync/nodes", data = "<members>", format = "json")]
fn nodes_changed(members: Json<NodesList>, membership: &State<Membership>) {
    info!(
        "Topology update: primary {}, backups {:?}",
        members.primary, members.nodes
    );
    if let Err(e) = membership.replace(members.0) {
        halt(e);
    }
}

#[post("/sync/restore", data = "<dump>", format = "json")]
async fn restore(
    dump: Json<StoreDump>,
    membership: &State<Membership>,
    db: &State<Database>,
) -> Result<()> {
    if let Err(e) = membership.ensure_backup("Restore") {
        halt(e);
    }
    restore_database(db, &dump).await?;
    debug!("Replayed store dump from primary");
    Ok(())
}

#[post("/sync/keys", data = "<key>", format = "json")]
async fn new_key(key: Json<VoterKey>, keys: &State<KeyStore>) -> Result<()> {
    keys.write(&key.name, &key.key).await?;
    debug!("Stored key of voter {}", key.name);
    Ok(())
}

#[get("/sync/ping")]
fn ping() {}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use mongodb::bson::doc;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json,
        tokio::fs,
    };

    use crate::api::testing::register;
    use crate::cluster::install_dump;
    use crate::model::{
        api::{auth::AuthToken, registration::VoterRegistration},
        db::{Challenge, NewChallenge, NewVoter, Voter},
        mongodb::{dump_database, Coll},
    };

    use super::*;

    const JOINER: &str = "127.0.0.1:1";

    async fn join_as(client: &Client, address: &str) -> (Status, Option<Dump>) {
        let node = NodeIdentifier {
            address: address.to_string(),
        };
        let response = client
            .post(uri!(join))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&node).unwrap())
            .dispatch()
            .await;
        let status = response.status();
        let dump = if status == Status::Ok {
            Some(serde_json::from_str(&response.into_string().await.unwrap()).unwrap())
        } else {
            None
        };
        (status, dump)
    }

    /// A rocket acting as backup of a primary that does not exist.
    async fn backup_client() -> (Client, Database) {
        let members = NodesList {
            primary: "127.0.0.1:1".to_string(),
            nodes: vec!["127.0.0.1:8000".to_string()],
        };
        let membership = Membership::with_topology("127.0.0.1:8000", members);
        let db_client = crate::db_client().await;
        let db_name = crate::database();
        let rocket = crate::rocket_for_db(db_client.clone(), &db_name, &crate::data_dir(), Some(membership));
        let client = Client::tracked(rocket).await.unwrap();
        (client, db_client.database(&db_name))
    }

    async fn cleanup_backup(client: &Client, db: Database) {
        let keys = client.rocket().state::<KeyStore>().unwrap();
        let data_dir = keys.dir().parent().unwrap().to_path_buf();
        fs::remove_dir_all(data_dir).await.unwrap();
        db.drop(None).await.unwrap();
    }

    #[backend_test]
    async fn ping_answers(client: Client) {
        let response = client.get(uri!(ping)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test(voter)]
    async fn join_transfers_state(client: Client, db: Database, token: AuthToken) {
        register(&client, &VoterRegistration::example2()).await;

        let (status, dump) = join_as(&client, JOINER).await;
        assert_eq!(Status::Ok, status);
        let dump = dump.unwrap();
        assert_eq!(dump.members.nodes, vec![JOINER]);
        let membership = client.rocket().state::<Membership>().unwrap();
        assert_eq!(membership.backups(), vec![JOINER]);
        assert_eq!(dump.keys.len(), 2);

        // Joining twice does not list the node twice.
        let (_, again) = join_as(&client, JOINER).await;
        assert_eq!(again.unwrap().members.nodes, vec![JOINER]);

        // Install everything on a fresh node.
        let other = crate::db_client()
            .await
            .database(&format!("{}_joiner", db.name()));
        let other_dir = crate::data_dir();
        let other_keys = KeyStore::open(other_dir.join("keys")).await.unwrap();
        let joined_keys = install_dump(&other, &other_keys, &other_dir, &dump).await.unwrap();

        assert_eq!(dump_database(&other).await.unwrap(), dump.content);
        assert_eq!(other_keys.dump().await.unwrap(), dump.keys);
        assert_eq!(
            joined_keys.verify_token(&token).unwrap(),
            VoterRegistration::example().name
        );
        let reloaded = ServerKeys::load_or_generate(&other_dir).await.unwrap();
        assert_eq!(reloaded.public_bytes(), dump.server_public_key);

        // And the other way round.
        let minted = joined_keys
            .issue_token("bob", Duration::minutes(5))
            .unwrap();
        let server_keys = client.rocket().state::<ServerKeys>().unwrap();
        assert_eq!(server_keys.verify_token(&minted).unwrap(), "bob");

        other.drop(None).await.unwrap();
        fs::remove_dir_all(other_dir).await.unwrap();
    }

    #[rocket::async_test]
    async fn backup_refuses_writes() {
        let (client, db) = backup_client().await;

        let response = client
            .post("/registration/voters")
            .header(ContentType::JSON)
            .body(serde_json::to_string(&VoterRegistration::example()).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::ServiceUnavailable, response.status());

        let (status, _) = join_as(&client, JOINER).await;
        assert_eq!(Status::ServiceUnavailable, status);

        // Reads and heartbeats are still served.
        let response = client.get("/voting/elections/e1/result").dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let response = client.get(uri!(ping)).dispatch().await;
        assert_eq!(Status::Ok, response.status());

        cleanup_backup(&client, db).await;
    }

    #[rocket::async_test]
    async fn backup_mirrors_pushed_state() {
        let (client, db) = backup_client().await;

        // Topology push.
        let members = NodesList {
            primary: "127.0.0.1:2".to_string(),
            nodes: vec!["127.0.0.1:8000".to_string(), "127.0.0.1:3".to_string()],
        };
        let response = client
            .post(uri!(nodes_changed))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&members).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let membership = client.rocket().state::<Membership>().unwrap();
        assert_eq!(membership.primary_address(), "127.0.0.1:2");
        assert_eq!(membership.backups(), vec!["127.0.0.1:3", "127.0.0.1:8000"]);
        assert_eq!(membership.backup_index(), Some(1));

        // Store dump from a "primary" database.
        let source = crate::db_client()
            .await
            .database(&format!("{}_source", db.name()));
        Coll::<NewVoter>::from_db(&source)
            .insert_one(NewVoter::example(), None)
            .await
            .unwrap();
        let dump = dump_database(&source).await.unwrap();
        let response = client
            .post(uri!(restore))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&dump).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let voter = Coll::<Voter>::from_db(&db)
            .find_one(doc! { "name": "alice" }, None)
            .await
            .unwrap();
        assert!(voter.is_some());

        // Key push.
        let key = VoterKey {
            name: "alice".to_string(),
            key: VoterRegistration::example().public_key,
        };
        let response = client
            .post(uri!(new_key))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&key).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let keys = client.rocket().state::<KeyStore>().unwrap();
        assert_eq!(keys.read("alice").await.unwrap(), Some(key.key));

        source.drop(None).await.unwrap();
        cleanup_backup(&client, db).await;
    }

    #[rocket::async_test]
    async fn backup_accepts_dumps_beyond_default_json_limit() {
        let (client, db) = backup_client().await;

        let source = crate::db_client()
            .await
            .database(&format!("{}_large", db.name()));
        let pending = (0..12_000).map(|i| NewChallenge::random(format!("voter{i}")));
        Coll::<NewChallenge>::from_db(&source)
            .insert_many(pending, None)
            .await
            .unwrap();
        let body = serde_json::to_string(&dump_database(&source).await.unwrap()).unwrap();
        assert!(body.len() > 1024 * 1024);

        let response = client
            .post(uri!(restore))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let count = Coll::<Challenge>::from_db(&db)
            .count_documents(None, None)
            .await
            .unwrap();
        assert_eq!(count, 12_000);

        source.drop(None).await.unwrap();
        cleanup_backup(&client, db).await;
    }
}
