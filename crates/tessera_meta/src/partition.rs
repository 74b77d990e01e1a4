//! Partition instance and the committed-entry apply dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tessera_raft::{ApplyStatus, NodeId, OpCode, PartitionId, PartitionStateMachine, RaftEntry, RaftStore};
use tokio::sync::mpsc;

use crate::config::{PartitionConfig, PartitionConfigStore, RaftPorts};
use crate::manager::PartitionEvent;
use crate::store::{ObjectStore, RootObject};

/// One metadata partition hosted on the local node.
///
/// Exactly one apply path per partition processes committed entries in commit
/// order; the replication layer guarantees that ordering, this type only
/// guards the config record itself.
pub struct MetaPartition {
    pub(crate) config: RwLock<PartitionConfig>,
    pub(crate) terminated: AtomicBool,
    pub(crate) raft: Arc<dyn RaftStore>,
    pub(crate) conf_store: Arc<dyn PartitionConfigStore>,
    pub(crate) objects: Arc<dyn ObjectStore>,
    pub(crate) events: mpsc::UnboundedSender<PartitionEvent>,
    pub(crate) ports: RaftPorts,
}

impl MetaPartition {
    pub fn new(
        config: PartitionConfig,
        raft: Arc<dyn RaftStore>,
        conf_store: Arc<dyn PartitionConfigStore>,
        objects: Arc<dyn ObjectStore>,
        events: mpsc::UnboundedSender<PartitionEvent>,
        ports: RaftPorts,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            terminated: AtomicBool::new(false),
            raft,
            conf_store,
            objects,
            events,
            ports,
        })
    }

    pub fn partition_id(&self) -> PartitionId {
        self.config.read().unwrap().partition_id
    }

    pub fn node_id(&self) -> NodeId {
        self.config.read().unwrap().node_id
    }

    /// Snapshot of the current config record.
    pub fn config(&self) -> PartitionConfig {
        self.config.read().unwrap().clone()
    }

    /// True once the local replica has removed itself from the replica set.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn apply_create_root_object(&self, payload: &[u8]) -> anyhow::Result<ApplyStatus> {
        let root: RootObject = match serde_json::from_slice(payload) {
            Ok(root) => root,
            Err(err) => {
                tracing::error!(
                    partition_id = self.partition_id(),
                    error = %err,
                    "create-root-object payload decode failed"
                );
                return Ok(ApplyStatus::InvalidArg);
            }
        };
        // Replayed creates (leader churn, catch-up) are a no-op once any
        // submission has landed.
        if self.objects.has_root_object()? {
            return Ok(ApplyStatus::Ok);
        }
        if let Err(err) = self.objects.put_object(&root) {
            tracing::error!(
                partition_id = self.partition_id(),
                error = ?err,
                "root object install failed"
            );
            return Ok(ApplyStatus::DiskErr);
        }
        tracing::info!(
            partition_id = self.partition_id(),
            object_id = root.object_id,
            "root object created"
        );
        Ok(ApplyStatus::Ok)
    }
}

impl PartitionStateMachine for MetaPartition {
    fn apply(&self, entry: RaftEntry) -> anyhow::Result<ApplyStatus> {
        if self.is_terminated() {
            tracing::warn!(
                partition_id = self.partition_id(),
                op = ?entry.op,
                "entry dropped: partition is terminated"
            );
            return Ok(ApplyStatus::AgainErr);
        }
        match entry.op {
            OpCode::CreateRootObject => self.apply_create_root_object(&entry.payload),
            OpCode::UpdateRangeEnd => self.apply_update_end(&entry.payload),
            OpCode::AddPeer | OpCode::RemovePeer | OpCode::UpdatePeer => {
                self.apply_membership(entry.op, &entry.payload)
            }
            OpCode::SetDeletionCursor => self.apply_set_deletion_cursor(&entry.payload),
        }
    }
}
