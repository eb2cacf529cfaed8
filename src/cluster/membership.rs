use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request, State,
};
use thiserror::Error;

use crate::error::Error;
use crate::model::api::sync::NodesList;

/// A backup-only call reached a node that believes it is the primary.
/// Two nodes acting as primary at once means the topology is corrupt.
#[derive(Debug, Error)]
#[error("received backup-only `{call}` while acting as primary {address}")]
pub struct SplitBrain {
    pub call: &'static str,
    pub address: String,
}

/// This node's view of the cluster topology.
///
/// Cheap to clone; all clones share the same view. Every read and write goes
/// through the lock, so the request handlers and the failover task never see
/// a torn update.
#[derive(Debug, Clone)]
pub struct Membership {
    own_address: Arc<str>,
    topology: Arc<RwLock<NodesList>>,
}

impl Membership {
    /// A fresh cluster with this node as primary and no backups.
    pub fn primary(own_address: &str) -> Self {
        Self::with_topology(
            own_address,
            NodesList {
                primary: own_address.to_string(),
                nodes: Vec::new(),
            },
        )
    }

    /// A backup that has learned the topology from its primary.
    pub fn with_topology(own_address: &str, topology: NodesList) -> Self {
        Self {
            own_address: own_address.into(),
            topology: Arc::new(RwLock::new(topology)),
        }
    }

    pub fn own_address(&self) -> &str {
        &self.own_address
    }

    pub fn snapshot(&self) -> NodesList {
        self.read().clone()
    }

    pub fn primary_address(&self) -> String {
        self.read().primary.clone()
    }

    pub fn backups(&self) -> Vec<String> {
        self.read().nodes.clone()
    }

    pub fn is_primary(&self) -> bool {
        self.read().primary == *self.own_address
    }

    /// Add a backup, keeping the list sorted and free of duplicates.
    /// Returns the resulting topology.
    pub fn add_backup(&self, address: &str) -> NodesList {
        let mut topology = self.write();
        if let Err(position) = topology.nodes.binary_search_by(|n| n.as_str().cmp(address)) {
            topology.nodes.insert(position, address.to_string());
        }
        topology.clone()
    }

    /// Refuse a backup-only call if this node is the primary.
    pub fn ensure_backup(&self, call: &'static str) -> Result<(), SplitBrain> {
        if self.is_primary() {
            Err(self.split_brain(call))
        } else {
            Ok(())
        }
    }

    /// Overwrite the topology with one pushed by the primary.
    pub fn replace(&self, mut members: NodesList) -> Result<(), SplitBrain> {
        let mut topology = self.write();
        if topology.primary == *self.own_address {
            return Err(self.split_brain("NodesChanged"));
        }
        members.nodes.sort();
        members.nodes.dedup();
        *topology = members;
        Ok(())
    }

    /// Position of this node in the sorted backup list.
    pub fn backup_index(&self) -> Option<usize> {
        self.read()
            .nodes
            .iter()
            .position(|n| *n == *self.own_address)
    }

    /// Take over as primary, but only if the primary is still the one that was
    /// found dead. Returns the new topology on success.
    pub fn promote_if_primary_is(&self, dead_primary: &str) -> Option<NodesList> {
        let mut topology = self.write();
        if topology.primary != dead_primary {
            return None;
        }
        let own: &str = &self.own_address;
        topology.primary = own.to_string();
        topology.nodes.retain(|n| n != own);
        Some(topology.clone())
    }

    fn split_brain(&self, call: &'static str) -> SplitBrain {
        SplitBrain {
            call,
            address: self.own_address.to_string(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, NodesList> {
        self.topology.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, NodesList> {
        self.topology.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Request guard admitting the request only on the primary.
/// Backups hold read replicas and never accept writes of their own.
pub struct PrimaryOnly;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for PrimaryOnly {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        // Unwrap is safe as `Membership` is always managed.
        let membership = req.guard::<&State<Membership>>().await.unwrap();
        if membership.is_primary() {
            Outcome::Success(PrimaryOnly)
        } else {
            Outcome::Failure((Status::ServiceUnavailable, Error::not_primary()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup(own: &str, primary: &str, nodes: &[&str]) -> Membership {
        Membership::with_topology(
            own,
            NodesList {
                primary: primary.to_string(),
                nodes: nodes.iter().map(|n| n.to_string()).collect(),
            },
        )
    }

    #[test]
    fn add_backup_sorts_and_deduplicates() {
        let membership = Membership::primary("p:1");
        membership.add_backup("c:1");
        membership.add_backup("a:1");
        let topology = membership.add_backup("c:1");

        assert_eq!(topology.primary, "p:1");
        assert_eq!(topology.nodes, vec!["a:1", "c:1"]);
        assert!(membership.is_primary());
    }

    #[test]
    fn primary_refuses_backup_calls() {
        let membership = Membership::primary("p:1");
        assert!(membership.ensure_backup("Sql").is_err());
        let pushed = NodesList {
            primary: "q:1".to_string(),
            nodes: vec![],
        };
        assert!(membership.replace(pushed).is_err());
        assert_eq!(membership.primary_address(), "p:1");
    }

    #[test]
    fn backup_accepts_new_topology() {
        let membership = backup("b:1", "p:1", &["b:1", "c:1"]);
        assert!(membership.ensure_backup("Sql").is_ok());

        let pushed = NodesList {
            primary: "q:1".to_string(),
            nodes: vec!["c:1".to_string(), "b:1".to_string()],
        };
        membership.replace(pushed).unwrap();

        assert_eq!(membership.primary_address(), "q:1");
        assert_eq!(membership.backups(), vec!["b:1", "c:1"]);
        assert_eq!(membership.backup_index(), Some(0));
    }

    #[test]
    fn lowest_survivor_promotes_and_others_stand_down() {
        let b0 = backup("b0:1", "p:1", &["b0:1", "b1:1", "b2:1"]);
        let b1 = backup("b1:1", "p:1", &["b0:1", "b1:1", "b2:1"]);
        assert_eq!(b0.backup_index(), Some(0));
        assert_eq!(b1.backup_index(), Some(1));

        let topology = b0.promote_if_primary_is("p:1").unwrap();
        assert_eq!(topology.primary, "b0:1");
        assert_eq!(topology.nodes, vec!["b1:1", "b2:1"]);
        assert!(b0.is_primary());

        // b0's push reaches b1 before b1's stagger runs out.
        b1.replace(topology).unwrap();
        assert!(b1.promote_if_primary_is("p:1").is_none());
        assert_eq!(b1.primary_address(), "b0:1");
        assert_eq!(b1.backup_index(), Some(0));
    }

    #[test]
    fn unlisted_node_has_no_index() {
        let membership = backup("x:1", "p:1", &["a:1"]);
        assert_eq!(membership.backup_index(), None);
    }
}
