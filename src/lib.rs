#[macro_use]
extern crate rocket;
#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;

pub use config::Config;

use cluster::ClusterFairing;
use config::{ConfigFairing, DatabaseFairing};
use logging::LoggerFairing;

/// Build a node from `Rocket.toml` and the `ROCKET_*` environment.
pub fn build() -> Rocket<Build> {
    assemble(rocket::build())
}

/// Mount the API and attach the setup fairings, which run in order.
fn assemble(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(ClusterFairing)
}

/// Connect to the test database server configured in `Rocket.toml`.
#[cfg(test)]
pub(crate) async fn db_client() -> mongodb::Client {
    let db_uri = rocket::Config::figment()
        .extract_inner::<String>("db_uri")
        .unwrap();
    mongodb::Client::with_uri_str(db_uri).await.unwrap()
}

/// A fresh database name, so concurrent tests never share state.
#[cfg(test)]
pub(crate) fn database() -> String {
    let random: u32 = rand::random();
    format!("test{random}")
}

/// A fresh data directory under the system temp directory.
#[cfg(test)]
pub(crate) fn data_dir() -> std::path::PathBuf {
    let random: u32 = rand::random();
    std::env::temp_dir().join(format!("evoting-test-{random}"))
}

/// A node using the given database and data directory. Without a staged
/// membership the node is a lone primary.
#[cfg(test)]
pub(crate) fn rocket_for_db(
    db_client: mongodb::Client,
    db_name: &str,
    data_dir: &std::path::Path,
    membership: Option<cluster::Membership>,
) -> Rocket<Build> {
    rocket_at("127.0.0.1:8000", db_client, db_name, data_dir, membership)
}

/// Like [`rocket_for_db`], but listening on `address` once launched.
#[cfg(test)]
pub(crate) fn rocket_at(
    address: &str,
    db_client: mongodb::Client,
    db_name: &str,
    data_dir: &std::path::Path,
    membership: Option<cluster::Membership>,
) -> Rocket<Build> {
    let (host, port) = address.rsplit_once(':').unwrap();
    let figment = rocket::Config::figment()
        .merge(("address", host))
        .merge(("port", port.parse::<u16>().unwrap()))
        .merge(("node_address", address))
        .merge(("data_dir", data_dir))
        .merge(("heartbeat_interval", 3_600_000));
    let db = db_client.database(db_name);
    let mut rocket = rocket::custom(figment).manage(db_client).manage(db);
    if let Some(membership) = membership {
        rocket = rocket.manage(membership);
    }
    assemble(rocket)
}

/// A local address nothing listens on yet.
#[cfg(test)]
pub(crate) fn free_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

/// Launch `rocket` in the background and wait until it answers heartbeats.
#[cfg(test)]
pub(crate) async fn launch(rocket: Rocket<Build>) -> rocket::Shutdown {
    use std::time::Duration;

    let rocket = rocket.ignite().await.unwrap();
    let shutdown = rocket.shutdown();
    let address = rocket.state::<Config>().unwrap().node_address().to_string();
    rocket::tokio::spawn(rocket.launch());

    let peers = cluster::PeerClient::new(Duration::from_millis(500));
    for _ in 0..50 {
        if peers.ping(&address, Duration::from_millis(200)).await.is_ok() {
            return shutdown;
        }
        rocket::tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("node at {address} never came up");
}
