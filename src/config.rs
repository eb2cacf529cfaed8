use std::path::{Path, PathBuf};

use chrono::Duration;
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::mongodb::ensure_indexes_exist;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address other nodes use to reach this one, e.g. `10.0.0.2:8000`.
    node_address: String,
    data_dir: PathBuf,
    auth_ttl: u32,
    join_primary: Option<String>,
    set_primary: Option<String>,
    // milliseconds
    heartbeat_interval: u32,
    ping_timeout: u32,
    failover_stagger: u32,
    sync_timeout: u32,
}

impl Config {
    /// The address this node announces to the cluster.
    pub fn node_address(&self) -> &str {
        &self.node_address
    }

    /// Directory holding the server keypair and the voter key store.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory of voter public keys.
    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }

    /// Valid lifetime of auth tokens in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Primary to join on startup. A node without one founds a new cluster.
    pub fn join_primary(&self) -> Option<&str> {
        self.join_primary.as_deref()
    }

    /// Shell command run whenever this node becomes primary.
    pub fn set_primary(&self) -> Option<&str> {
        self.set_primary.as_deref()
    }

    /// Pause between heartbeats to the primary.
    pub fn heartbeat_interval(&self) -> std::time::Duration {
        millis(self.heartbeat_interval)
    }

    /// Deadline for each heartbeat.
    pub fn ping_timeout(&self) -> std::time::Duration {
        millis(self.ping_timeout)
    }

    /// Delay per position in the backup list before attempting promotion.
    pub fn failover_stagger(&self) -> std::time::Duration {
        millis(self.failover_stagger)
    }

    /// Deadline for each replication message to a backup.
    pub fn sync_timeout(&self) -> std::time::Duration {
        millis(self.sync_timeout)
    }
}

fn millis(ms: u32) -> std::time::Duration {
    std::time::Duration::from_millis(ms.into())
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!(
            "Node {} using data directory {}",
            config.node_address(),
            config.data_dir().display()
        );

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
    db_name: Option<String>,
}

/// A fairing that loads the MongoDB config, connects to the database,
/// performs any setup necessary, and places both a `Client` and a `Database`
/// into managed state.
///
/// A `Database` already in managed state is used as is, which lets tests
/// point each rocket at its own database.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        if let Some(db) = rocket.state::<mongodb::Database>().cloned() {
            if let Err(e) = ensure_indexes_exist(&db).await {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
            return Ok(rocket);
        }

        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        // Construct the connection.
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db_name = config.db_name.unwrap_or_else(default_database_name);
        let db = client.database(&db_name);

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database `{db_name}` online!");

        // Manage the state.
        rocket = rocket.manage(client).manage(db);
        Ok(rocket)
    }
}

/// Database used when `db_name` is not configured.
fn default_database_name() -> String {
    "evoting".to_string()
}
