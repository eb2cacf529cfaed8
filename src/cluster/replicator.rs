use mongodb::Database;
use rocket::tokio::{
    self,
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

use crate::error::Result;
use crate::model::api::sync::{Dump, NodesList, VoterKey};
use crate::model::keys::{KeyStore, ServerKeys};
use crate::model::mongodb::dump_database;

use super::{
    peer::{broadcast, PeerClient},
    Membership,
};

/// An update waiting to be pushed to the backups.
#[derive(Debug)]
enum Push {
    /// The store changed. The dump is taken when the push is sent, so one
    /// dump covers every change queued before it.
    Store,
    Key(VoterKey),
    Topology { skip: Option<String> },
}

/// Pushes state from the primary to its backups.
///
/// Handlers only queue updates; a background worker sends them in order.
/// Sends are best effort: a backup that misses an update catches up with the
/// next full dump, and a slow backup delays replication, never a reply.
pub struct Replicator {
    db: Database,
    keys: KeyStore,
    membership: Membership,
    queue: UnboundedSender<Push>,
}

impl Replicator {
    /// Start the replication worker. Must be called inside a tokio runtime.
    pub fn start(db: Database, keys: KeyStore, membership: Membership, peers: PeerClient) -> Self {
        let (queue, pending) = unbounded_channel();
        let worker = Worker {
            db: db.clone(),
            membership: membership.clone(),
            peers,
        };
        tokio::spawn(worker.run(pending));
        Self {
            db,
            keys,
            membership,
            queue,
        }
    }

    /// Replace every backup's store with a fresh dump of ours.
    pub fn sync_to_backups(&self) {
        self.enqueue(Push::Store);
    }

    /// Send a newly written voter key to every backup.
    pub fn sync_key_to_backups(&self, key: &VoterKey) {
        self.enqueue(Push::Key(key.clone()));
    }

    /// Tell every backup except `skip` about the current topology.
    pub fn notify_nodes_changed(&self, skip: Option<&str>) {
        self.enqueue(Push::Topology {
            skip: skip.map(str::to_string),
        });
    }

    /// Admit `address` as a backup and collect everything it needs to mirror us.
    ///
    /// The node is listed before the dump is taken, so every later push
    /// includes it.
    pub async fn admit(&self, address: &str, server_keys: &ServerKeys) -> Result<Dump> {
        let members = self.membership.add_backup(address);
        info!("Node {address} joined, backups are now {:?}", members.nodes);
        let dump = Dump {
            content: dump_database(&self.db).await?,
            keys: self.keys.dump().await?,
            server_public_key: server_keys.public_bytes(),
            server_private_key: server_keys.private_bytes(),
            members,
        };
        Ok(dump)
    }

    fn enqueue(&self, push: Push) {
        if let Err(e) = self.queue.send(push) {
            error!("Replication worker is gone, dropping {:?}", e.0);
        }
    }
}

struct Worker {
    db: Database,
    membership: Membership,
    peers: PeerClient,
}

impl Worker {
    async fn run(self, mut pending: UnboundedReceiver<Push>) {
        let mut next = pending.recv().await;
        while let Some(push) = next.take() {
            match push {
                Push::Store => {
                    // Store pushes already queued are covered by this dump.
                    next = loop {
                        match pending.try_recv() {
                            Ok(Push::Store) => continue,
                            Ok(other) => break Some(other),
                            Err(_) => break None,
                        }
                    };
                    self.send_store().await;
                }
                Push::Key(key) => {
                    let backups = self.membership.backups();
                    broadcast(&backups, "voter key", |backup| self.peers.new_key(backup, &key)).await;
                }
                Push::Topology { skip } => {
                    let members = self.membership.snapshot();
                    notify_nodes_changed(&self.peers, &members, skip.as_deref()).await;
                }
            }
            if next.is_none() {
                next = pending.recv().await;
            }
        }
        debug!("Replication worker stopped");
    }

    async fn send_store(&self) {
        let backups = self.membership.backups();
        if backups.is_empty() {
            return;
        }
        let dump = match dump_database(&self.db).await {
            Ok(dump) => dump,
            Err(e) => {
                error!("Cannot dump store for replication: {e}");
                return;
            }
        };
        broadcast(&backups, "store dump", |backup| {
            self.peers.restore(backup, &dump)
        })
        .await;
    }
}

/// Push `members` to every backup except `skip`.
pub async fn notify_nodes_changed(peers: &PeerClient, members: &NodesList, skip: Option<&str>) {
    let targets: Vec<String> = members
        .nodes
        .iter()
        .filter(|n| Some(n.as_str()) != skip)
        .cloned()
        .collect();
    broadcast(&targets, "topology", |backup| peers.nodes_changed(backup, members)).await;
}
