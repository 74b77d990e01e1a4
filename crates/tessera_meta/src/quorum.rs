//! Quorum safety gate consulted before a remove-replica entry is proposed.

use tessera_raft::{NodeId, PartitionId, RaftStore};

use crate::config::PartitionConfig;
use crate::partition::MetaPartition;

/// Outcome of the removal gate. Callers branch on the variant, so this is a
/// typed error rather than an opaque one.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuorumError {
    #[error("peer {peer} is not a member of partition {partition_id}")]
    NotAMember {
        partition_id: PartitionId,
        peer: NodeId,
    },
    #[error(
        "partition {partition_id} has too many unreachable replicas {down:?}, refusing to remove peer {peer}"
    )]
    InsufficientQuorum {
        partition_id: PartitionId,
        peer: NodeId,
        down: Vec<NodeId>,
    },
}

/// Decide whether removing `target` keeps the partition able to reach quorum.
///
/// The target itself never counts against the remaining quorum: it becomes
/// unreachable by definition once removed. Odd-sized replica sets demand one
/// spare beyond bare majority (`>`), even-sized sets accept bare majority
/// (`>=`) — the asymmetry is a deliberate safety-margin policy and must stay.
pub fn can_remove(
    config: &PartitionConfig,
    target: NodeId,
    down: &[NodeId],
) -> Result<(), QuorumError> {
    if !config.has_peer(target) {
        return Err(QuorumError::NotAMember {
            partition_id: config.partition_id,
            peer: target,
        });
    }

    let others_down: Vec<NodeId> = down.iter().copied().filter(|id| *id != target).collect();
    let total = config.peers.len();
    let healthy_after_removal = total.saturating_sub(others_down.len());

    let safe = if total % 2 == 1 {
        healthy_after_removal > total / 2 + 1
    } else {
        healthy_after_removal >= total / 2 + 1
    };
    if safe {
        Ok(())
    } else {
        Err(QuorumError::InsufficientQuorum {
            partition_id: config.partition_id,
            peer: target,
            down: others_down,
        })
    }
}

impl MetaPartition {
    /// Gate for the administrative decommission path, querying the
    /// replication layer's unreachable set fresh on every call.
    pub fn can_remove_peer(&self, target: NodeId) -> Result<(), QuorumError> {
        let config = self.config.read().unwrap();
        let down = self.raft.down_replicas(config.partition_id);
        can_remove(&config, target, &down)
    }
}
