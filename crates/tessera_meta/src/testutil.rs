//! Shared fixtures for the unit-test suites.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tessera_raft::{
    ApplyStatus, NodeId, PartitionId, PartitionStateMachine, RaftEntry, RaftStore,
};
use tokio::sync::mpsc;

use crate::config::{PartitionConfig, PartitionConfigStore, PeerInfo, RaftPorts};
use crate::manager::PartitionEvent;
use crate::partition::MetaPartition;
use crate::store::MemObjectStore;

/// Unique scratch directory per test, cleaned up by the OS tmp reaper.
pub(crate) fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!("tessera_{name}_{}_{}", std::process::id(), nanos))
}

pub(crate) fn peer(id: NodeId) -> PeerInfo {
    PeerInfo {
        id,
        addr: format!("10.0.0.{id}:9021"),
    }
}

/// Raft store test double with settable leadership/down-set and call logs.
#[derive(Default)]
pub(crate) struct MockRaftStore {
    leader: AtomicBool,
    fail_submit: AtomicBool,
    down: Mutex<Vec<NodeId>>,
    submissions: Mutex<Vec<RaftEntry>>,
    add_peer_calls: Mutex<Vec<(NodeId, String, u16, u16)>>,
    remove_peer_calls: Mutex<Vec<NodeId>>,
    destroy_calls: Mutex<Vec<PartitionId>>,
    sm: Mutex<Option<Arc<dyn PartitionStateMachine>>>,
}

impl MockRaftStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wire the state machine submissions commit into.
    pub(crate) fn attach(&self, sm: Arc<dyn PartitionStateMachine>) {
        *self.sm.lock().unwrap() = Some(sm);
    }

    pub(crate) fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }

    pub(crate) fn set_down(&self, down: Vec<NodeId>) {
        *self.down.lock().unwrap() = down;
    }

    pub(crate) fn fail_submissions(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn submissions(&self) -> Vec<RaftEntry> {
        self.submissions.lock().unwrap().clone()
    }

    pub(crate) fn add_peer_calls(&self) -> Vec<(NodeId, String, u16, u16)> {
        self.add_peer_calls.lock().unwrap().clone()
    }

    pub(crate) fn remove_peer_calls(&self) -> Vec<NodeId> {
        self.remove_peer_calls.lock().unwrap().clone()
    }

    pub(crate) fn destroy_calls(&self) -> Vec<PartitionId> {
        self.destroy_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RaftStore for MockRaftStore {
    async fn submit(
        &self,
        _partition_id: PartitionId,
        entry: RaftEntry,
    ) -> anyhow::Result<ApplyStatus> {
        if self.fail_submit.load(Ordering::SeqCst) {
            anyhow::bail!("injected submission failure");
        }
        self.submissions.lock().unwrap().push(entry.clone());
        let sm = self.sm.lock().unwrap().clone();
        match sm {
            Some(sm) => sm.apply(entry),
            None => Ok(ApplyStatus::Ok),
        }
    }

    fn is_leader(&self, _partition_id: PartitionId) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn down_replicas(&self, _partition_id: PartitionId) -> Vec<NodeId> {
        self.down.lock().unwrap().clone()
    }

    fn add_peer(
        &self,
        _partition_id: PartitionId,
        peer_id: NodeId,
        host: &str,
        heartbeat_port: u16,
        replication_port: u16,
    ) -> anyhow::Result<()> {
        self.add_peer_calls.lock().unwrap().push((
            peer_id,
            host.to_string(),
            heartbeat_port,
            replication_port,
        ));
        Ok(())
    }

    fn remove_peer(&self, _partition_id: PartitionId, peer_id: NodeId) -> anyhow::Result<()> {
        self.remove_peer_calls.lock().unwrap().push(peer_id);
        Ok(())
    }

    fn destroy_partition(&self, partition_id: PartitionId) -> anyhow::Result<()> {
        self.destroy_calls.lock().unwrap().push(partition_id);
        Ok(())
    }
}

/// In-memory config store with an injectable persist failure.
#[derive(Default)]
pub(crate) struct MemConfigStore {
    fail: AtomicBool,
    persisted: Mutex<Vec<PartitionConfig>>,
}

impl MemConfigStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_next_persists(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn persisted(&self) -> Vec<PartitionConfig> {
        self.persisted.lock().unwrap().clone()
    }
}

impl PartitionConfigStore for MemConfigStore {
    fn persist(&self, config: &PartitionConfig) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("injected persist failure");
        }
        self.persisted.lock().unwrap().push(config.clone());
        Ok(())
    }
}

pub(crate) struct TestPartition {
    pub(crate) partition: Arc<MetaPartition>,
    pub(crate) raft: Arc<MockRaftStore>,
    pub(crate) conf_store: Arc<MemConfigStore>,
    pub(crate) events: mpsc::UnboundedReceiver<PartitionEvent>,
}

/// Partition 1 on node 1 with replicas {1, 2, 3} and a scratch root dir.
pub(crate) fn test_partition(name: &str) -> TestPartition {
    let root_dir = temp_dir(name);
    fs::create_dir_all(&root_dir).expect("create partition root");

    let config = PartitionConfig {
        partition_id: 1,
        start: 0,
        end: 1 << 20,
        node_id: 1,
        peers: vec![peer(1), peer(2), peer(3)],
        root_dir,
    };
    let raft = MockRaftStore::new();
    let conf_store = MemConfigStore::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let partition = MetaPartition::new(
        config,
        raft.clone(),
        conf_store.clone(),
        MemObjectStore::new(),
        events_tx,
        RaftPorts {
            heartbeat: 9093,
            replication: 9094,
        },
    );
    raft.attach(partition.clone());

    TestPartition {
        partition,
        raft,
        conf_store,
        events: events_rx,
    }
}
