//! Minimal object-store surface consumed by the partition FSM.
//!
//! The full inode/extent engine lives elsewhere; the FSM only needs to test
//! for the root object and to install it when a create entry commits.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use fjall::{Keyspace, PartitionCreateOptions};
use serde::{Deserialize, Serialize};
use tessera_raft::PartitionId;

use crate::unix_time_ms;

/// Object id reserved for a partition's namespace root.
pub const ROOT_OBJECT_ID: u64 = 1;

/// The partition's first metadata object, created exactly once through
/// consensus so every replica converges on identical content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootObject {
    pub object_id: u64,
    pub partition_id: PartitionId,
    pub create_unix_ms: u64,
}

impl RootObject {
    /// Canonical root object proposed by the bootstrap loop. The timestamp is
    /// stamped once by the submitting leader and travels inside the entry, so
    /// applying replicas stay deterministic.
    pub fn canonical(partition_id: PartitionId) -> Self {
        Self {
            object_id: ROOT_OBJECT_ID,
            partition_id,
            create_unix_ms: unix_time_ms(),
        }
    }
}

/// Storage-engine surface the FSM reads and writes.
pub trait ObjectStore: Send + Sync + 'static {
    fn has_root_object(&self) -> anyhow::Result<bool>;
    fn put_object(&self, object: &RootObject) -> anyhow::Result<()>;
    fn get_object(&self, object_id: u64) -> anyhow::Result<Option<RootObject>>;
}

/// Fjall-backed object table, one keyspace partition per metadata partition.
pub struct FjallObjectStore {
    objects: fjall::PartitionHandle,
}

impl FjallObjectStore {
    pub fn open(keyspace: Arc<Keyspace>, partition_id: PartitionId) -> anyhow::Result<Self> {
        let name = format!("objects_{partition_id}");
        let objects = keyspace
            .open_partition(&name, PartitionCreateOptions::default())
            .with_context(|| format!("open object partition {name}"))?;
        Ok(Self { objects })
    }
}

impl ObjectStore for FjallObjectStore {
    fn has_root_object(&self) -> anyhow::Result<bool> {
        Ok(self.objects.get(ROOT_OBJECT_ID.to_be_bytes())?.is_some())
    }

    fn put_object(&self, object: &RootObject) -> anyhow::Result<()> {
        let value = serde_json::to_vec(object).context("serialize object")?;
        self.objects
            .insert(object.object_id.to_be_bytes(), value)
            .context("insert object")?;
        Ok(())
    }

    fn get_object(&self, object_id: u64) -> anyhow::Result<Option<RootObject>> {
        let Some(value) = self.objects.get(object_id.to_be_bytes())? else {
            return Ok(None);
        };
        let object = serde_json::from_slice(&value).context("parse object")?;
        Ok(Some(object))
    }
}

/// In-memory object table for tests and embedded use.
#[derive(Default)]
pub struct MemObjectStore {
    objects: RwLock<BTreeMap<u64, RootObject>>,
}

impl MemObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ObjectStore for MemObjectStore {
    fn has_root_object(&self) -> anyhow::Result<bool> {
        Ok(self.objects.read().unwrap().contains_key(&ROOT_OBJECT_ID))
    }

    fn put_object(&self, object: &RootObject) -> anyhow::Result<()> {
        self.objects
            .write()
            .unwrap()
            .insert(object.object_id, object.clone());
        Ok(())
    }

    fn get_object(&self, object_id: u64) -> anyhow::Result<Option<RootObject>> {
        Ok(self.objects.read().unwrap().get(&object_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::temp_dir;

    #[test]
    fn mem_store_round_trips_root_object() {
        let store = MemObjectStore::new();
        assert!(!store.has_root_object().expect("query"));

        let root = RootObject::canonical(5);
        store.put_object(&root).expect("put");
        assert!(store.has_root_object().expect("query"));
        assert_eq!(store.get_object(ROOT_OBJECT_ID).expect("get"), Some(root));
    }

    #[test]
    fn fjall_store_round_trips_root_object() {
        let dir = temp_dir("object_store");
        let keyspace = Arc::new(
            fjall::Config::new(&dir)
                .open()
                .expect("open temporary keyspace"),
        );

        let store = FjallObjectStore::open(keyspace.clone(), 9).expect("open store");
        assert!(!store.has_root_object().expect("query"));

        let root = RootObject::canonical(9);
        store.put_object(&root).expect("put");
        assert!(store.has_root_object().expect("query"));
        assert_eq!(store.get_object(ROOT_OBJECT_ID).expect("get"), Some(root));

        drop(store);
        drop(keyspace);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
