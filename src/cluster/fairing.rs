use std::path::Path;

use mongodb::Database;
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::{self, fs},
    Build, Orbit, Rocket,
};

use crate::config::Config;
use crate::error::Result;
use crate::model::{
    api::sync::Dump,
    keys::{KeyStore, ServerKeys},
    mongodb::restore_database,
};

use super::{run_set_primary, watch_primary, FailoverTiming, Membership, PeerClient, Replicator};

/// A fairing that brings the node into its cluster.
///
/// On ignite a node configured with `join_primary` pulls the primary's state
/// and becomes a backup; any other node founds a cluster as primary. The key
/// stores, [`Membership`], [`PeerClient`] and [`Replicator`] are placed into
/// managed state. On liftoff backups start watching the primary.
///
/// A `Membership` already in managed state is kept and no join happens.
pub struct ClusterFairing;

#[rocket::async_trait]
impl Fairing for ClusterFairing {
    fn info(&self) -> Info {
        Info {
            name: "Cluster",
            kind: Kind::Ignite | Kind::Liftoff,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Both are managed by earlier fairings.
        let (Some(config), Some(db)) = (
            rocket.state::<Config>().cloned(),
            rocket.state::<Database>().cloned(),
        ) else {
            error!("Cluster setup needs the config and database fairings");
            return Err(rocket);
        };
        let peers = PeerClient::new(config.sync_timeout());
        let staged = rocket.state::<Membership>().cloned();

        let (membership, keys, server_keys) = match join_or_found(&config, &db, &peers, staged).await {
            Ok(setup) => setup,
            Err(e) => {
                error!("Failed to set up cluster node: {e}");
                return Err(rocket);
            }
        };

        let replicator = Replicator::start(db, keys.clone(), membership.clone(), peers.clone());
        if rocket.state::<Membership>().is_none() {
            rocket = rocket.manage(membership);
        }
        rocket = rocket
            .manage(keys)
            .manage(server_keys)
            .manage(peers)
            .manage(replicator);
        Ok(rocket)
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        // Unwrap is safe as ignite only succeeds with all three managed.
        let config = rocket.state::<Config>().unwrap();
        let membership = rocket.state::<Membership>().unwrap().clone();
        let peers = rocket.state::<PeerClient>().unwrap().clone();
        let set_primary = config.set_primary().map(str::to_string);

        if membership.is_primary() {
            tokio::spawn(async move { run_set_primary(set_primary.as_deref()).await });
        } else {
            let timing = FailoverTiming {
                heartbeat_interval: config.heartbeat_interval(),
                ping_timeout: config.ping_timeout(),
                stagger: config.failover_stagger(),
            };
            info!(
                "Watching primary {} every {:?}",
                membership.primary_address(),
                timing.heartbeat_interval
            );
            tokio::spawn(watch_primary(membership, peers, timing, set_primary));
        }
    }
}

async fn join_or_found(
    config: &Config,
    db: &Database,
    peers: &PeerClient,
    staged: Option<Membership>,
) -> Result<(Membership, KeyStore, ServerKeys)> {
    fs::create_dir_all(config.data_dir()).await?;
    let keys = KeyStore::open(config.keys_dir()).await?;
    let own = config.node_address();

    if let Some(membership) = staged {
        let server_keys = ServerKeys::load_or_generate(config.data_dir()).await?;
        return Ok((membership, keys, server_keys));
    }

    match config.join_primary() {
        None => {
            info!("No primary to join, founding a cluster at {own}");
            let server_keys = ServerKeys::load_or_generate(config.data_dir()).await?;
            Ok((Membership::primary(own), keys, server_keys))
        }
        Some(primary) => {
            info!("Joining cluster through primary {primary}");
            keys.reset().await?;
            let dump = peers.join(primary, own).await?;
            let server_keys = install_dump(db, &keys, config.data_dir(), &dump).await?;
            info!(
                "Joined as backup with {} voter keys, backups are {:?}",
                dump.keys.len(),
                dump.members.nodes
            );
            Ok((Membership::with_topology(own, dump.members), keys, server_keys))
        }
    }
}

/// Make this node a replica of the state in `dump`: the store, every voter
/// key, and the server keypair, which is also saved to `data_dir`.
pub async fn install_dump(
    db: &Database,
    keys: &KeyStore,
    data_dir: &Path,
    dump: &Dump,
) -> Result<ServerKeys> {
    restore_database(db, &dump.content).await?;
    for key in &dump.keys {
        keys.write(&key.name, &key.key).await?;
    }
    let server_keys = ServerKeys::from_bytes(&dump.server_public_key, &dump.server_private_key)?;
    server_keys.save(data_dir).await?;
    Ok(server_keys)
}
