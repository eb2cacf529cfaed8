use std::future::Future;
use std::time::Duration;

use rocket::futures::future::join_all;
use serde::Serialize;

use crate::error::Result;
use crate::model::api::sync::{Dump, NodeIdentifier, NodesList, StoreDump, VoterKey};

/// HTTP client for the `/sync` API of other nodes.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    /// Deadline for every replication send.
    timeout: Duration,
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// Liveness probe with its own deadline.
    pub async fn ping(&self, address: &str, timeout: Duration) -> Result<()> {
        self.http
            .get(sync_url(address, "ping"))
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Ask `primary` to admit `own_address` as a backup and hand over its state.
    pub async fn join(&self, primary: &str, own_address: &str) -> Result<Dump> {
        let body = NodeIdentifier {
            address: own_address.to_string(),
        };
        let dump = self
            .http
            .post(sync_url(primary, "join"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(dump)
    }

    pub async fn nodes_changed(&self, address: &str, members: &NodesList) -> Result<()> {
        self.post(address, "nodes", members).await
    }

    pub async fn restore(&self, address: &str, dump: &StoreDump) -> Result<()> {
        self.post(address, "restore", dump).await
    }

    pub async fn new_key(&self, address: &str, key: &VoterKey) -> Result<()> {
        self.post(address, "keys", key).await
    }

    async fn post<T: Serialize + ?Sized>(&self, address: &str, path: &str, body: &T) -> Result<()> {
        self.http
            .post(sync_url(address, path))
            .json(body)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Send to every target concurrently. Failures are logged and otherwise ignored.
pub async fn broadcast<'a, F, Fut>(targets: &'a [String], what: &str, send: F)
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let sends = targets.iter().map(|target| {
        let fut = send(target);
        async move { (target, fut.await) }
    });
    for (target, result) in join_all(sends).await {
        match result {
            Ok(()) => debug!("Sent {what} to {target}"),
            Err(e) => warn!("Failed to send {what} to {target}: {e}"),
        }
    }
}

fn sync_url(address: &str, path: &str) -> String {
    if address.contains("://") {
        format!("{address}/sync/{path}")
    } else {
        format!("http://{address}/sync/{path}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::error::Error;

    use super::*;

    #[test]
    fn urls_default_to_http() {
        assert_eq!(sync_url("10.0.0.2:8000", "ping"), "http://10.0.0.2:8000/sync/ping");
        assert_eq!(
            sync_url("https://node.example:443", "join"),
            "https://node.example:443/sync/join"
        );
    }

    #[rocket::async_test]
    async fn broadcast_reaches_every_target_despite_failures() {
        let targets = vec!["a:1".to_string(), "b:1".to_string(), "c:1".to_string()];
        let reached = Mutex::new(Vec::new());
        broadcast(&targets, "test", |target| {
            reached.lock().unwrap().push(target.to_string());
            async move {
                if target == "b:1" {
                    Err(Error::not_primary())
                } else {
                    Ok(())
                }
            }
        })
        .await;

        let mut reached = reached.into_inner().unwrap();
        reached.sort();
        assert_eq!(reached, targets);
    }

    #[rocket::async_test]
    async fn unreachable_peer_fails_within_deadline() {
        let peers = PeerClient::new(Duration::from_millis(200));
        assert!(peers
            .ping("127.0.0.1:1", Duration::from_millis(200))
            .await
            .is_err());
        assert!(peers
            .restore("127.0.0.1:1", &StoreDump::default())
            .await
            .is_err());
    }
}
