//! End-to-end partition lifecycle over the in-process replication store.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tessera_meta::{
    run_root_bootstrap, BootstrapOutcome, FileConfigStore, FjallObjectStore, MetaPartition,
    PartitionConfig, PartitionEvent, PeerInfo, RaftPorts,
};
use tessera_raft::{ApplyStatus, LocalRaftStore, OpCode, RaftEntry, RaftStore};
use tokio::sync::{mpsc, watch};

fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!("tessera_{name}_{}_{}", std::process::id(), nanos))
}

fn peer(id: u64) -> PeerInfo {
    PeerInfo {
        id,
        addr: format!("10.0.0.{id}:9021"),
    }
}

struct Node {
    partition: Arc<MetaPartition>,
    raft: Arc<LocalRaftStore>,
    events: mpsc::UnboundedReceiver<PartitionEvent>,
    data_dir: PathBuf,
    // Held so the storage engine outlives the object-store handle.
    _keyspace: Arc<fjall::Keyspace>,
}

fn start_node(name: &str) -> Node {
    let data_dir = temp_dir(name);
    let storage_dir = data_dir.join("storage");
    let partition_root = data_dir.join("partitions").join("1");
    fs::create_dir_all(&storage_dir).expect("create storage dir");
    fs::create_dir_all(&partition_root).expect("create partition root");

    let keyspace = Arc::new(
        fjall::Config::new(&storage_dir)
            .open()
            .expect("open keyspace"),
    );
    let config = PartitionConfig {
        partition_id: 1,
        start: 0,
        end: 1 << 20,
        node_id: 1,
        peers: vec![peer(1), peer(2), peer(3)],
        root_dir: partition_root,
    };

    let raft = LocalRaftStore::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let objects =
        Arc::new(FjallObjectStore::open(keyspace.clone(), 1).expect("open object store"));
    let partition = MetaPartition::new(
        config,
        raft.clone(),
        Arc::new(FileConfigStore::new()),
        objects,
        events_tx,
        RaftPorts {
            heartbeat: 9093,
            replication: 9094,
        },
    );
    raft.register_partition(1, partition.clone());

    Node {
        partition,
        raft,
        events: events_rx,
        data_dir,
        _keyspace: keyspace,
    }
}

fn reconfig_payload(add: Option<PeerInfo>, remove: Option<PeerInfo>) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "partition_id": 1,
        "add_peer": add,
        "remove_peer": remove,
    }))
    .expect("encode reconfig request")
}

#[tokio::test]
async fn partition_lifecycle_end_to_end() {
    let mut node = start_node("lifecycle");
    let partition = node.partition.clone();
    let raft = node.raft.clone();

    // Bootstrap: the single node is leader, so exactly one create commits.
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let outcome = run_root_bootstrap(partition.clone(), cancel_rx)
        .await
        .expect("bootstrap");
    assert_eq!(outcome, BootstrapOutcome::Done);
    let creates = raft
        .committed_entries(1)
        .iter()
        .filter(|e| e.op == OpCode::CreateRootObject)
        .count();
    assert_eq!(creates, 1);

    // A second bootstrap (restart, leader churn) short-circuits on existence.
    let (_cancel_tx2, cancel_rx2) = watch::channel(false);
    let outcome = run_root_bootstrap(partition.clone(), cancel_rx2)
        .await
        .expect("bootstrap replay");
    assert_eq!(outcome, BootstrapOutcome::Done);
    let creates = raft
        .committed_entries(1)
        .iter()
        .filter(|e| e.op == OpCode::CreateRootObject)
        .count();
    assert_eq!(creates, 1, "replayed bootstrap must not submit again");

    // Grow the range boundary; the persisted record follows the change.
    let status = raft
        .submit(1, RaftEntry::new(OpCode::UpdateRangeEnd, (1u64 << 30).to_be_bytes().to_vec()))
        .await
        .expect("submit range update");
    assert_eq!(status, ApplyStatus::Ok);
    assert_eq!(partition.config().end, 1 << 30);
    let reloaded = FileConfigStore::load(partition.config().root_dir)
        .expect("reload config")
        .expect("config present");
    assert_eq!(reloaded.end, 1 << 30);

    // Add a replica, then replay the same entry: the second is a no-op.
    let status = raft
        .submit(1, RaftEntry::new(OpCode::AddPeer, reconfig_payload(Some(peer(4)), None)))
        .await
        .expect("submit add");
    assert_eq!(status, ApplyStatus::Ok);
    assert_eq!(partition.config().peers.len(), 4);
    let registrations = raft.peer_registrations(1);
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].host, "10.0.0.4");
    assert_eq!(registrations[0].heartbeat_port, 9093);
    assert_eq!(registrations[0].replication_port, 9094);

    raft.submit(1, RaftEntry::new(OpCode::AddPeer, reconfig_payload(Some(peer(4)), None)))
        .await
        .expect("submit add replay");
    assert_eq!(partition.config().peers.len(), 4);
    assert_eq!(raft.peer_registrations(1).len(), 1);

    // Record the deletion cursor and sweep consumed segments behind it.
    let root_dir = partition.config().root_dir;
    for idx in 1..=7 {
        fs::write(root_dir.join(format!("del_log_{idx:05}")), b"x").expect("seed segment");
    }
    let status = raft
        .submit(
            1,
            RaftEntry::new(OpCode::SetDeletionCursor, b"del_log_00005 4096".to_vec()),
        )
        .await
        .expect("submit cursor");
    assert_eq!(status, ApplyStatus::Ok);
    assert_eq!(
        fs::read(root_dir.join("del_log_00005")).expect("read cursor"),
        4096i64.to_be_bytes()
    );
    partition
        .sweep_deletion_segments("del_log_00005")
        .expect("sweep");
    assert!(!root_dir.join("del_log_00004").exists());
    assert!(root_dir.join("del_log_00006").exists());

    // Remove a remote replica, then the local one: the partition terminates,
    // notifies the manager, and the store refuses further submissions.
    let status = raft
        .submit(1, RaftEntry::new(OpCode::RemovePeer, reconfig_payload(None, Some(peer(4)))))
        .await
        .expect("submit remove");
    assert_eq!(status, ApplyStatus::Ok);
    assert_eq!(partition.config().peers.len(), 3);

    let status = raft
        .submit(1, RaftEntry::new(OpCode::RemovePeer, reconfig_payload(None, Some(peer(1)))))
        .await
        .expect("submit self remove");
    assert_eq!(status, ApplyStatus::Ok);
    assert!(partition.is_terminated());
    assert_eq!(node.events.try_recv().ok(), Some(PartitionEvent::Removed(1)));
    assert!(
        !partition.config().root_dir.exists(),
        "local partition state must be deleted on self-removal"
    );
    assert!(raft
        .submit(1, RaftEntry::new(OpCode::UpdatePeer, reconfig_payload(None, None)))
        .await
        .is_err());

    let _ = fs::remove_dir_all(&node.data_dir);
}

#[tokio::test]
async fn follower_waits_for_replicated_root_object() {
    let node = start_node("follower_bootstrap");
    let partition = node.partition.clone();
    let raft = node.raft.clone();
    raft.set_leader(1, false);

    // Another replica's earlier submission arrives through the apply path
    // while this node polls.
    let apply_side = partition.clone();
    let installer = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        let root = tessera_meta::RootObject {
            object_id: tessera_meta::ROOT_OBJECT_ID,
            partition_id: 1,
            create_unix_ms: 11,
        };
        let payload = serde_json::to_vec(&root).expect("serialize root");
        use tessera_raft::PartitionStateMachine;
        apply_side
            .apply(RaftEntry::new(OpCode::CreateRootObject, payload))
            .expect("apply replicated create");
    });

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let outcome = run_root_bootstrap(partition, cancel_rx)
        .await
        .expect("bootstrap");
    installer.await.expect("installer");
    assert_eq!(outcome, BootstrapOutcome::Done);
    assert!(
        raft.committed_entries(1).is_empty(),
        "a follower that sees the replicated object must not submit"
    );

    let _ = fs::remove_dir_all(&node.data_dir);
}
