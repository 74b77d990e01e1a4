//! Node-level partition table.
//!
//! Teardown triggered from inside the apply path (a replica removing itself)
//! is delivered here as an event rather than a direct call, so the apply path
//! never has to outlive the object that is deleting it.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tessera_raft::PartitionId;
use tokio::sync::mpsc;

use crate::partition::MetaPartition;

/// Events emitted by partitions toward the owning manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionEvent {
    /// The partition removed its local replica and tore itself down.
    Removed(PartitionId),
}

/// Owns every partition hosted on this node.
#[derive(Default)]
pub struct PartitionManager {
    partitions: RwLock<BTreeMap<PartitionId, Arc<MetaPartition>>>,
}

impl PartitionManager {
    /// Create a manager plus the event channel partitions report through.
    pub fn new() -> (
        Arc<Self>,
        mpsc::UnboundedSender<PartitionEvent>,
        mpsc::UnboundedReceiver<PartitionEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::default()), tx, rx)
    }

    pub fn insert(&self, partition: Arc<MetaPartition>) {
        self.partitions
            .write()
            .unwrap()
            .insert(partition.partition_id(), partition);
    }

    pub fn get(&self, partition_id: PartitionId) -> Option<Arc<MetaPartition>> {
        self.partitions.read().unwrap().get(&partition_id).cloned()
    }

    pub fn remove(&self, partition_id: PartitionId) -> Option<Arc<MetaPartition>> {
        self.partitions.write().unwrap().remove(&partition_id)
    }

    pub fn len(&self) -> usize {
        self.partitions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.read().unwrap().is_empty()
    }

    /// Drain partition events until every sender is dropped.
    pub async fn run_events(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<PartitionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                PartitionEvent::Removed(partition_id) => {
                    if self.remove(partition_id).is_some() {
                        tracing::info!(partition_id, "partition dropped from node table");
                    } else {
                        tracing::warn!(partition_id, "removal event for unknown partition");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_partition, TestPartition};

    #[tokio::test]
    async fn removal_event_drops_partition_from_table() {
        let (manager, tx, rx) = PartitionManager::new();
        let TestPartition { partition, .. } = test_partition("manager_events");
        let partition_id = partition.partition_id();
        manager.insert(partition);
        assert_eq!(manager.len(), 1);

        let loop_handle = tokio::spawn(manager.clone().run_events(rx));
        tx.send(PartitionEvent::Removed(partition_id))
            .expect("send event");
        drop(tx);
        loop_handle.await.expect("event loop");

        assert!(manager.is_empty());
    }

    #[test]
    fn get_returns_inserted_partition() {
        let (manager, _tx, _rx) = PartitionManager::new();
        let TestPartition { partition, .. } = test_partition("manager_lookup");
        let partition_id = partition.partition_id();
        manager.insert(partition);

        assert!(manager.get(partition_id).is_some());
        assert!(manager.get(partition_id + 1).is_none());
        assert!(manager.remove(partition_id).is_some());
        assert!(manager.is_empty());
    }
}
