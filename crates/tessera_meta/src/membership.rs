//! Membership reconfiguration: add, remove, and update replica entries.

use std::fs;
use std::sync::atomic::Ordering;

use serde::{Deserialize, Serialize};
use tessera_raft::{ApplyStatus, OpCode, PartitionId};

use crate::config::PeerInfo;
use crate::manager::PartitionEvent;
use crate::partition::MetaPartition;

/// Replicated payload for membership operations, produced by the
/// administrative decommission path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconfigRequest {
    pub partition_id: PartitionId,
    #[serde(default)]
    pub add_peer: Option<PeerInfo>,
    #[serde(default)]
    pub remove_peer: Option<PeerInfo>,
}

impl MetaPartition {
    pub(crate) fn apply_membership(
        &self,
        op: OpCode,
        payload: &[u8],
    ) -> anyhow::Result<ApplyStatus> {
        let req: ReconfigRequest = match serde_json::from_slice(payload) {
            Ok(req) => req,
            Err(err) => {
                tracing::error!(
                    partition_id = self.partition_id(),
                    op = ?op,
                    error = %err,
                    "membership payload decode failed"
                );
                return Ok(ApplyStatus::InvalidArg);
            }
        };
        let updated = match op {
            OpCode::AddPeer => self.apply_add_peer(&req)?,
            OpCode::RemovePeer => self.apply_remove_peer(&req)?,
            OpCode::UpdatePeer => self.apply_update_peer(&req)?,
            _ => return Ok(ApplyStatus::InvalidArg),
        };
        tracing::debug!(
            partition_id = self.partition_id(),
            op = ?op,
            updated,
            "membership entry applied"
        );
        Ok(ApplyStatus::Ok)
    }

    /// Append a new replica and register it with the replication transport.
    ///
    /// Redundant delivery of an already-present peer is a no-op. The payload
    /// address may carry a port; only the bare host is registered, at the
    /// node's own heartbeat/replication ports.
    pub(crate) fn apply_add_peer(&self, req: &ReconfigRequest) -> anyhow::Result<bool> {
        let Some(candidate) = &req.add_peer else {
            anyhow::bail!("add-peer request is missing a candidate peer");
        };
        let partition_id = self.partition_id();
        {
            let config = self.config.read().unwrap();
            if config.has_peer(candidate.id) {
                tracing::info!(
                    partition_id,
                    peer = candidate.id,
                    "add-peer replay: peer already present"
                );
                return Ok(false);
            }
        }

        let mut next = self.config.read().unwrap().clone();
        next.peers.push(candidate.clone());
        self.conf_store.persist(&next)?;
        *self.config.write().unwrap() = next;

        let host = candidate
            .addr
            .split(':')
            .next()
            .unwrap_or(candidate.addr.as_str());
        self.raft.add_peer(
            partition_id,
            candidate.id,
            host,
            self.ports.heartbeat,
            self.ports.replication,
        )?;
        tracing::info!(
            partition_id,
            peer = candidate.id,
            addr = %candidate.addr,
            "peer added"
        );
        Ok(true)
    }

    /// Remove a replica from the set, tearing the partition down locally when
    /// the removed identity is our own.
    ///
    /// Self-removal reports `updated = false`: the partition is gone, so there
    /// is no further local membership bookkeeping — callers must treat it as
    /// terminal rather than as a failed update.
    pub(crate) fn apply_remove_peer(&self, req: &ReconfigRequest) -> anyhow::Result<bool> {
        let Some(target) = &req.remove_peer else {
            anyhow::bail!("remove-peer request is missing a target peer");
        };
        let partition_id = self.partition_id();
        let (present, local_node, root_dir) = {
            let config = self.config.read().unwrap();
            (
                config.has_peer(target.id),
                config.node_id,
                config.root_dir.clone(),
            )
        };
        if !present {
            tracing::info!(
                partition_id,
                peer = target.id,
                "remove-peer replay: peer not present"
            );
            return Ok(false);
        }

        let mut next = self.config.read().unwrap().clone();
        next.peers.retain(|p| p.id != target.id);

        if target.id == local_node {
            tracing::info!(partition_id, node = local_node, "removing local replica");
            // Refuse further entries before any teardown step runs.
            self.terminated.store(true, Ordering::SeqCst);
            *self.config.write().unwrap() = next;

            // Teardown is best-effort: a half-removed partition is re-deleted
            // on the next sweep, so failures are reported, not fatal.
            if let Err(err) = self.raft.remove_peer(partition_id, target.id) {
                tracing::warn!(partition_id, error = ?err, "transport deregistration failed");
            }
            if let Err(err) = self.raft.destroy_partition(partition_id) {
                tracing::warn!(partition_id, error = ?err, "consensus teardown failed");
            }
            if self
                .events
                .send(PartitionEvent::Removed(partition_id))
                .is_err()
            {
                tracing::warn!(partition_id, "partition manager is gone; removal not delivered");
            }
            if let Err(err) = fs::remove_dir_all(&root_dir) {
                tracing::warn!(
                    partition_id,
                    path = %root_dir.display(),
                    error = %err,
                    "partition state cleanup failed"
                );
            }
            return Ok(false);
        }

        self.conf_store.persist(&next)?;
        *self.config.write().unwrap() = next;
        self.raft.remove_peer(partition_id, target.id)?;
        tracing::info!(partition_id, peer = target.id, "peer removed");
        Ok(true)
    }

    /// Reserved for address changes without an id change. The operation code
    /// stays decodable for wire/log compatibility, the handler is a no-op.
    pub(crate) fn apply_update_peer(&self, _req: &ReconfigRequest) -> anyhow::Result<bool> {
        Ok(false)
    }
}
