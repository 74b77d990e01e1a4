//! Range-boundary updates with persist-or-rollback semantics.

use tessera_raft::ApplyStatus;

use crate::partition::MetaPartition;

impl MetaPartition {
    /// Grow the partition's upper key-range boundary.
    ///
    /// The updated record is built as a copy, persisted, and only then
    /// installed in memory; a persist failure simply discards the copy, so the
    /// observable `end` is exactly the value before the call.
    pub(crate) fn apply_update_end(&self, payload: &[u8]) -> anyhow::Result<ApplyStatus> {
        let partition_id = self.partition_id();
        let Ok(bytes) = <[u8; 8]>::try_from(payload) else {
            tracing::error!(
                partition_id,
                len = payload.len(),
                "update-range-end payload must be 8 big-endian bytes"
            );
            return Ok(ApplyStatus::InvalidArg);
        };
        let new_end = u64::from_be_bytes(bytes);

        let mut next = self.config.read().unwrap().clone();
        let old_end = next.end;
        next.end = new_end;
        if let Err(err) = self.conf_store.persist(&next) {
            tracing::error!(
                partition_id,
                old_end,
                new_end,
                error = ?err,
                "range end persist failed, keeping previous boundary"
            );
            return Ok(ApplyStatus::DiskErr);
        }
        *self.config.write().unwrap() = next;
        tracing::info!(partition_id, old_end, new_end, "range end updated");
        Ok(ApplyStatus::Ok)
    }
}
