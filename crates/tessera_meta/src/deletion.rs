//! Deferred-deletion cursor and segment sweeper.
//!
//! Deletion work is recorded in segment files under the partition root whose
//! names sort lexically in chronological order. A small fixed-format cursor
//! file tracks how far the consumer has read into the active segment;
//! fully-consumed segments behind the cursor are physically removed.

use std::fs;

use anyhow::Context;
use tessera_raft::ApplyStatus;

use crate::partition::MetaPartition;

/// Name prefix identifying deletion-log segment files.
pub const DELETION_SEGMENT_PREFIX: &str = "del_log_";

impl MetaPartition {
    /// Record the consumer's position as an 8-byte big-endian offset at the
    /// path derived from the active segment's name.
    ///
    /// The cursor file is the sole source of truth for resumption: a write
    /// failure is reported but rolls back nothing else.
    pub(crate) fn apply_set_deletion_cursor(&self, payload: &[u8]) -> anyhow::Result<ApplyStatus> {
        let partition_id = self.partition_id();
        let Some((file_name, offset)) = parse_cursor(payload) else {
            tracing::error!(
                partition_id,
                "deletion cursor payload must be \"<file_name> <offset>\""
            );
            return Ok(ApplyStatus::InvalidArg);
        };

        let path = self.config.read().unwrap().root_dir.join(&file_name);
        if let Err(err) = fs::write(&path, offset.to_be_bytes()) {
            tracing::error!(
                partition_id,
                file = %file_name,
                offset,
                error = %err,
                "deletion cursor write failed"
            );
            return Ok(ApplyStatus::DiskErr);
        }
        tracing::debug!(partition_id, file = %file_name, offset, "deletion cursor set");
        Ok(ApplyStatus::Ok)
    }

    /// Remove every deletion-log segment whose name sorts strictly below
    /// `boundary`, stopping at the first name at or past it.
    ///
    /// Per-segment failures are tolerated: the scan is idempotent, so a
    /// segment left behind is retried on the next sweep.
    pub fn sweep_deletion_segments(&self, boundary: &str) -> anyhow::Result<()> {
        let partition_id = self.partition_id();
        let root_dir = self.config.read().unwrap().root_dir.clone();

        let mut names = Vec::new();
        for entry in fs::read_dir(&root_dir).context("list partition root")? {
            let entry = entry.context("read partition root entry")?;
            if !entry.file_type().context("stat partition root entry")?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(DELETION_SEGMENT_PREFIX) {
                names.push(name.to_string());
            }
        }
        names.sort_unstable();

        let mut removed = 0usize;
        for name in names {
            // Names sort chronologically, so the first kept segment ends the scan.
            if name.as_str() >= boundary {
                break;
            }
            match fs::remove_file(root_dir.join(&name)) {
                Ok(()) => removed += 1,
                Err(err) => {
                    tracing::warn!(
                        partition_id,
                        segment = %name,
                        error = %err,
                        "segment removal failed; will retry on next sweep"
                    );
                }
            }
        }
        tracing::debug!(partition_id, boundary, removed, "deletion segments swept");
        Ok(())
    }
}

/// Strictly parse a `"<file_name> <offset>"` cursor record.
fn parse_cursor(payload: &[u8]) -> Option<(String, i64)> {
    let text = std::str::from_utf8(payload).ok()?;
    let mut fields = text.split_whitespace();
    let file_name = fields.next()?;
    let offset: i64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((file_name.to_string(), offset))
}
