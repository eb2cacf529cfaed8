use std::time::Duration;

use rocket::tokio::{task::spawn_blocking, time::sleep};

use super::{halt, replicator::notify_nodes_changed, Membership, PeerClient};

/// Timing of the failover loop.
#[derive(Debug, Clone, Copy)]
pub struct FailoverTiming {
    pub heartbeat_interval: Duration,
    pub ping_timeout: Duration,
    /// Extra wait per position in the backup list before taking over.
    pub stagger: Duration,
}

/// Watch the primary and take over when it stops answering.
///
/// Backups wait in order of their position in the sorted backup list, so the
/// first survivor promotes itself and announces the new topology before the
/// others run out of patience. Returns once this node is primary.
pub async fn watch_primary(
    membership: Membership,
    peers: PeerClient,
    timing: FailoverTiming,
    set_primary: Option<String>,
) {
    loop {
        sleep(timing.heartbeat_interval).await;
        if membership.is_primary() {
            return;
        }

        let primary = membership.primary_address();
        let Err(e) = peers.ping(&primary, timing.ping_timeout).await else {
            continue;
        };
        warn!("Primary {primary} did not answer heartbeat: {e}");

        let Some(index) = membership.backup_index() else {
            halt(format!(
                "Node {} is missing from its own backup list",
                membership.own_address()
            ));
        };
        sleep(timing.stagger * index as u32).await;

        match membership.promote_if_primary_is(&primary) {
            Some(members) => {
                warn!(
                    "Node {} took over from {primary}, backups are now {:?}",
                    membership.own_address(),
                    members.nodes
                );
                notify_nodes_changed(&peers, &members, None).await;
                run_set_primary(set_primary.as_deref()).await;
                return;
            }
            None => info!(
                "Primary changed to {} while waiting, watching it instead",
                membership.primary_address()
            ),
        }
    }
}

/// Run the operator's hook for this node becoming primary, if configured.
pub async fn run_set_primary(command: Option<&str>) {
    let Some(command) = command else {
        return;
    };
    info!("Running set_primary action: {command}");
    let owned = command.to_string();
    let output = spawn_blocking(move || {
        std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(owned)
            .output()
    })
    .await;
    match output {
        Ok(Ok(output)) if output.status.success() => debug!("set_primary action finished"),
        Ok(Ok(output)) => warn!(
            "set_primary action exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Ok(Err(e)) => warn!("Cannot run set_primary action: {e}"),
        Err(e) => warn!("set_primary action panicked: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use mongodb::Database;
    use rocket::{
        tokio::{self, fs, time::timeout},
        Shutdown,
    };

    use crate::model::api::sync::NodesList;

    use super::*;

    /// A launched backup with its own store and data directory.
    struct Node {
        membership: Membership,
        db: Database,
        data_dir: PathBuf,
        shutdown: Shutdown,
    }

    impl Node {
        async fn launch_backup(address: &str, members: &NodesList) -> Self {
            let db_client = crate::db_client().await;
            let db = db_client.database(&crate::database());
            let data_dir = crate::data_dir();
            let membership = Membership::with_topology(address, members.clone());
            let shutdown = crate::launch(crate::rocket_at(
                address,
                db_client,
                db.name(),
                &data_dir,
                Some(membership.clone()),
            ))
            .await;
            Self {
                membership,
                db,
                data_dir,
                shutdown,
            }
        }

        async fn stop(self) {
            self.shutdown.notify();
            self.db.drop(None).await.unwrap();
            fs::remove_dir_all(self.data_dir).await.unwrap();
        }
    }

    fn quick() -> FailoverTiming {
        FailoverTiming {
            heartbeat_interval: Duration::from_millis(20),
            ping_timeout: Duration::from_millis(100),
            stagger: Duration::from_millis(50),
        }
    }

    #[rocket::async_test]
    async fn sole_backup_takes_over_from_dead_primary() {
        // Nothing listens on port 1.
        let membership = Membership::with_topology(
            "127.0.0.1:2",
            NodesList {
                primary: "127.0.0.1:1".to_string(),
                nodes: vec!["127.0.0.1:2".to_string()],
            },
        );
        let peers = PeerClient::new(Duration::from_millis(100));

        timeout(
            Duration::from_secs(10),
            watch_primary(membership.clone(), peers, quick(), None),
        )
        .await
        .unwrap();

        assert!(membership.is_primary());
        assert!(membership.backups().is_empty());
    }

    #[rocket::async_test]
    async fn promoted_node_stops_watching() {
        let membership = Membership::primary("127.0.0.1:2");
        let peers = PeerClient::new(Duration::from_millis(100));
        timeout(
            Duration::from_secs(5),
            watch_primary(membership.clone(), peers, quick(), None),
        )
        .await
        .unwrap();
        assert_eq!(membership.primary_address(), "127.0.0.1:2");
    }

    #[rocket::async_test]
    async fn set_primary_action_runs() {
        let random: u32 = rand::random();
        let marker = std::env::temp_dir().join(format!("evoting-set-primary-{random}"));
        let command = format!("touch {}", marker.display());

        run_set_primary(Some(&command)).await;

        assert!(marker.exists());
        std::fs::remove_file(marker).unwrap();
    }

    #[rocket::async_test]
    async fn first_backup_takes_over_and_the_rest_follow() {
        let mut addresses: Vec<String> = (0..3).map(|_| crate::free_address()).collect();
        addresses.sort();
        // Nothing listens on port 1.
        let members = NodesList {
            primary: "127.0.0.1:1".to_string(),
            nodes: addresses.clone(),
        };
        let mut nodes = Vec::new();
        for address in &addresses {
            nodes.push(Node::launch_backup(address, &members).await);
        }

        let timing = FailoverTiming {
            heartbeat_interval: Duration::from_millis(20),
            ping_timeout: Duration::from_millis(100),
            stagger: Duration::from_millis(500),
        };
        let mut watchers: Vec<_> = nodes
            .iter()
            .map(|node| {
                let peers = PeerClient::new(Duration::from_secs(1));
                tokio::spawn(watch_primary(node.membership.clone(), peers, timing, None))
            })
            .collect();

        // Only the first backup returns, as the others now watch it.
        timeout(Duration::from_secs(10), watchers.remove(0))
            .await
            .unwrap()
            .unwrap();
        let expected = NodesList {
            primary: addresses[0].clone(),
            nodes: addresses[1..].to_vec(),
        };
        // Outlast every stagger, so a second takeover would have happened by now.
        tokio::time::sleep(timing.stagger * 3).await;

        assert!(nodes[0].membership.is_primary());
        for node in &nodes {
            assert_eq!(node.membership.snapshot(), expected);
        }
        for watcher in watchers {
            assert!(!watcher.is_finished());
            watcher.abort();
        }

        for node in nodes {
            node.stop().await;
        }
    }
}
