//! Partition configuration and its durable store.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tessera_raft::{NodeId, PartitionId};

/// File name of the persisted partition config under the partition root.
pub const CONFIG_FILE: &str = "meta_partition.json";

/// One member of a partition's replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: NodeId,
    pub addr: String,
}

/// Locally configured ports the replication transport listens on.
///
/// Replicated membership payloads carry only a peer's bare address; the ports
/// are a local concern reapplied at registration time.
#[derive(Debug, Clone, Copy)]
pub struct RaftPorts {
    pub heartbeat: u16,
    pub replication: u16,
}

/// Authoritative per-partition configuration record.
///
/// Owned by exactly one partition instance and persisted on every accepted
/// mutation. `start` is fixed at creation; `end` only grows. `peers` is unique
/// by id and its order is stable for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub partition_id: PartitionId,
    pub start: u64,
    pub end: u64,
    pub node_id: NodeId,
    pub peers: Vec<PeerInfo>,
    pub root_dir: PathBuf,
}

impl PartitionConfig {
    pub fn has_peer(&self, id: NodeId) -> bool {
        self.peers.iter().any(|p| p.id == id)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root_dir.join(CONFIG_FILE)
    }
}

/// Durable sink for the partition config.
///
/// A successful `persist` must leave the on-disk record identical to the
/// argument; the apply path installs its in-memory copy only afterwards, so
/// memory and disk never diverge on the success path.
pub trait PartitionConfigStore: Send + Sync + 'static {
    fn persist(&self, config: &PartitionConfig) -> anyhow::Result<()>;
}

/// File-backed config store writing pretty JSON under the partition root.
///
/// The record is replaced atomically (temp file + rename) so a crash
/// mid-persist can never leave a corrupt record observable on restart.
#[derive(Debug, Default)]
pub struct FileConfigStore;

impl FileConfigStore {
    pub fn new() -> Self {
        Self
    }

    /// Read a previously persisted config back, if one exists.
    pub fn load(root_dir: impl AsRef<Path>) -> anyhow::Result<Option<PartitionConfig>> {
        let path = root_dir.as_ref().join(CONFIG_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read partition config {path:?}"))
            }
        };
        let config =
            serde_json::from_slice(&data).with_context(|| format!("parse partition config {path:?}"))?;
        Ok(Some(config))
    }
}

impl PartitionConfigStore for FileConfigStore {
    fn persist(&self, config: &PartitionConfig) -> anyhow::Result<()> {
        fs::create_dir_all(&config.root_dir).context("create partition root dir")?;
        let path = config.config_path();
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(config).context("serialize partition config")?;
        fs::write(&tmp, data).with_context(|| format!("write partition config {tmp:?}"))?;
        fs::rename(&tmp, &path).with_context(|| format!("install partition config {path:?}"))?;
        Ok(())
    }
}
