//! Primary-backup replication: who is primary, how state reaches the
//! backups, and how a backup takes over.

use std::fmt::Display;

mod failover;
mod fairing;
mod membership;
mod peer;
mod replicator;

pub use failover::{run_set_primary, watch_primary, FailoverTiming};
pub use fairing::{install_dump, ClusterFairing};
pub use membership::{Membership, PrimaryOnly, SplitBrain};
pub use peer::PeerClient;
pub use replicator::Replicator;

/// Stop the process after an invariant violation that leaves the cluster in
/// an unknown state.
pub fn halt(reason: impl Display) -> ! {
    error!("{reason}");
    error!("Critical failure, shutting down");
    std::process::exit(1)
}
