use std::collections::BTreeMap;

use rocket::serde::json::Value;
use serde::{Deserialize, Serialize};

/// Identifies a cluster node by the address its sync API listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentifier {
    pub address: String,
}

/// The cluster topology: who is primary and the sorted list of backups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodesList {
    pub primary: String,
    pub nodes: Vec<String>,
}

/// Replay script for the credential store, keyed by collection name.
/// Each document is canonical extended JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDump {
    pub collections: BTreeMap<String, Vec<Value>>,
}

/// A voter's public key file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterKey {
    pub name: String,
    #[serde(with = "super::hex")]
    pub key: Vec<u8>,
}

/// Everything a joining node needs to become a replica of the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dump {
    pub content: StoreDump,
    pub keys: Vec<VoterKey>,
    #[serde(with = "super::hex")]
    pub server_public_key: Vec<u8>,
    #[serde(with = "super::hex")]
    pub server_private_key: Vec<u8>,
    /// Topology including the joining node.
    pub members: NodesList,
}
