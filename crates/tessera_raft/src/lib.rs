//! Consensus-facing contracts for metadata partitions.
//!
//! These types are kept in a small, dependency-light crate because they are
//! shared between the partition FSM and whatever replication layer drives it.
//! The replication layer treats commands as opaque bytes; the FSM implements
//! [`PartitionStateMachine`] and consumes a [`RaftStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Logical node identifier within a replica set.
pub type NodeId = u64;
/// Logical identifier for a metadata partition.
pub type PartitionId = u64;

/// Operation codes recognized by the partition FSM.
///
/// `UpdatePeer` is reserved: peers may still emit it, so the code must stay
/// decodable even though its handler is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
    CreateRootObject,
    UpdateRangeEnd,
    AddPeer,
    RemovePeer,
    UpdatePeer,
    SetDeletionCursor,
}

/// One committed log entry: an operation code plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftEntry {
    pub op: OpCode,
    pub payload: Vec<u8>,
}

impl RaftEntry {
    pub fn new(op: OpCode, payload: Vec<u8>) -> Self {
        Self { op, payload }
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Result code produced by an apply, answered to the originating client when
/// the local replica is the leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    Ok,
    DiskErr,
    InvalidArg,
    AgainErr,
    InternalErr,
}

/// Application state machine driven by the replication layer.
///
/// Entries arrive in commit order, exactly once per committed index, and only
/// after a durable quorum agreed on that index. Implementations must be
/// deterministic: no wall clock, randomness, or local-only state may influence
/// a decision that reaches persisted configuration.
pub trait PartitionStateMachine: Send + Sync + 'static {
    fn apply(&self, entry: RaftEntry) -> anyhow::Result<ApplyStatus>;
}

/// The replication-layer surface a partition consumes.
///
/// Implementations must be safe for concurrent peer registration and
/// deregistration across different partitions.
#[async_trait]
pub trait RaftStore: Send + Sync + 'static {
    /// Propose an entry and block until it commits (and applies locally) or
    /// fails. Timeout and retry policy belong to the replication layer.
    async fn submit(&self, partition_id: PartitionId, entry: RaftEntry)
        -> anyhow::Result<ApplyStatus>;

    fn is_leader(&self, partition_id: PartitionId) -> bool;

    /// Replica identities currently considered unreachable. Queried fresh on
    /// every call, never cached by the FSM.
    fn down_replicas(&self, partition_id: PartitionId) -> Vec<NodeId>;

    /// Register a peer with the replication transport at the locally
    /// configured heartbeat/replication ports.
    fn add_peer(
        &self,
        partition_id: PartitionId,
        peer_id: NodeId,
        host: &str,
        heartbeat_port: u16,
        replication_port: u16,
    ) -> anyhow::Result<()>;

    fn remove_peer(&self, partition_id: PartitionId, peer_id: NodeId) -> anyhow::Result<()>;

    /// Tear down local consensus participation for a partition.
    fn destroy_partition(&self, partition_id: PartitionId) -> anyhow::Result<()>;
}

/// A peer registration recorded by [`LocalRaftStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRegistration {
    pub peer_id: NodeId,
    pub host: String,
    pub heartbeat_port: u16,
    pub replication_port: u16,
}

#[derive(Clone)]
struct PartitionSlot {
    sm: Arc<dyn PartitionStateMachine>,
    apply_lock: Arc<Mutex<()>>,
    log: Arc<Mutex<Vec<RaftEntry>>>,
    leader: Arc<AtomicBool>,
    down: Arc<Mutex<Vec<NodeId>>>,
    peers: Arc<Mutex<Vec<PeerRegistration>>>,
}

/// In-process single-node `RaftStore`.
///
/// Commit is immediate: submitted entries are appended to a per-partition log
/// and applied inline under a per-partition lock, which preserves the
/// one-apply-path-per-partition ordering guarantee. Leadership and the
/// down-replica set are settable so tests can exercise follower and
/// degraded-quorum behavior.
#[derive(Default)]
pub struct LocalRaftStore {
    slots: RwLock<HashMap<PartitionId, PartitionSlot>>,
}

impl LocalRaftStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a state machine for a partition. A single node is trivially the
    /// leader of every partition it hosts.
    pub fn register_partition(
        &self,
        partition_id: PartitionId,
        sm: Arc<dyn PartitionStateMachine>,
    ) {
        let slot = PartitionSlot {
            sm,
            apply_lock: Arc::new(Mutex::new(())),
            log: Arc::new(Mutex::new(Vec::new())),
            leader: Arc::new(AtomicBool::new(true)),
            down: Arc::new(Mutex::new(Vec::new())),
            peers: Arc::new(Mutex::new(Vec::new())),
        };
        self.slots.write().unwrap().insert(partition_id, slot);
    }

    pub fn set_leader(&self, partition_id: PartitionId, leader: bool) {
        if let Some(slot) = self.slots.read().unwrap().get(&partition_id) {
            slot.leader.store(leader, Ordering::SeqCst);
        }
    }

    pub fn set_down_replicas(&self, partition_id: PartitionId, down: Vec<NodeId>) {
        if let Some(slot) = self.slots.read().unwrap().get(&partition_id) {
            *slot.down.lock().unwrap() = down;
        }
    }

    /// Entries committed for a partition, in commit order.
    pub fn committed_entries(&self, partition_id: PartitionId) -> Vec<RaftEntry> {
        self.slots
            .read()
            .unwrap()
            .get(&partition_id)
            .map(|slot| slot.log.lock().unwrap().clone())
            .unwrap_or_default()
    }

    /// Peer registrations recorded through `add_peer`, in call order.
    pub fn peer_registrations(&self, partition_id: PartitionId) -> Vec<PeerRegistration> {
        self.slots
            .read()
            .unwrap()
            .get(&partition_id)
            .map(|slot| slot.peers.lock().unwrap().clone())
            .unwrap_or_default()
    }

    fn slot(&self, partition_id: PartitionId) -> anyhow::Result<PartitionSlot> {
        self.slots
            .read()
            .unwrap()
            .get(&partition_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown partition {partition_id}"))
    }
}

#[async_trait]
impl RaftStore for LocalRaftStore {
    async fn submit(
        &self,
        partition_id: PartitionId,
        entry: RaftEntry,
    ) -> anyhow::Result<ApplyStatus> {
        let slot = self.slot(partition_id)?;
        // One apply path per partition: commit order equals apply order.
        let _guard = slot.apply_lock.lock().unwrap();
        slot.log.lock().unwrap().push(entry.clone());
        slot.sm.apply(entry)
    }

    fn is_leader(&self, partition_id: PartitionId) -> bool {
        self.slots
            .read()
            .unwrap()
            .get(&partition_id)
            .map(|slot| slot.leader.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn down_replicas(&self, partition_id: PartitionId) -> Vec<NodeId> {
        self.slots
            .read()
            .unwrap()
            .get(&partition_id)
            .map(|slot| slot.down.lock().unwrap().clone())
            .unwrap_or_default()
    }

    fn add_peer(
        &self,
        partition_id: PartitionId,
        peer_id: NodeId,
        host: &str,
        heartbeat_port: u16,
        replication_port: u16,
    ) -> anyhow::Result<()> {
        let slot = self.slot(partition_id)?;
        slot.peers.lock().unwrap().push(PeerRegistration {
            peer_id,
            host: host.to_string(),
            heartbeat_port,
            replication_port,
        });
        Ok(())
    }

    fn remove_peer(&self, partition_id: PartitionId, peer_id: NodeId) -> anyhow::Result<()> {
        let slot = self.slot(partition_id)?;
        slot.peers.lock().unwrap().retain(|p| p.peer_id != peer_id);
        Ok(())
    }

    fn destroy_partition(&self, partition_id: PartitionId) -> anyhow::Result<()> {
        self.slots.write().unwrap().remove(&partition_id);
        Ok(())
    }
}
