//! Leader-driven root-object bootstrap.
//!
//! Runs once per partition at local startup, before normal apply traffic
//! matters: it produces the create entry that the apply path later consumes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tessera_raft::{OpCode, RaftEntry};
use tokio::sync::watch;

use crate::partition::MetaPartition;
use crate::store::RootObject;

/// Delay between bootstrap polls while waiting for leadership or replication.
const BOOTSTRAP_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Terminal states of the bootstrap loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The root object exists locally, or our submission committed.
    Done,
    /// The partition was stopped while polling; nothing was submitted.
    Cancelled,
}

/// Ensure exactly one root object exists for a freshly created partition.
///
/// Each iteration checks, in priority order: the cancellation signal, local
/// existence of the root object (it may arrive via replication from an
/// earlier leader's submission), then leadership. Only the leader submits;
/// followers keep polling until the object appears or they become leader.
/// Leadership churn is tolerated: once any submission commits, the next
/// leader's existence check short-circuits.
///
/// Serialization or submission failure is returned as an error; the partition
/// must not continue half-initialized, so callers treat it as fatal.
pub async fn run_root_bootstrap(
    partition: Arc<MetaPartition>,
    mut cancel: watch::Receiver<bool>,
) -> anyhow::Result<BootstrapOutcome> {
    let partition_id = partition.partition_id();
    loop {
        // Cancellation always wins: never submit after the stop signal.
        if *cancel.borrow() {
            tracing::info!(partition_id, "root bootstrap cancelled");
            return Ok(BootstrapOutcome::Cancelled);
        }
        if partition.objects.has_root_object()? {
            tracing::debug!(partition_id, "root object already present");
            return Ok(BootstrapOutcome::Done);
        }
        if partition.raft.is_leader(partition_id) {
            let root = RootObject::canonical(partition_id);
            let payload = serde_json::to_vec(&root).context("serialize root object")?;
            let status = partition
                .raft
                .submit(partition_id, RaftEntry::new(OpCode::CreateRootObject, payload))
                .await
                .context("submit root object")?;
            tracing::info!(partition_id, status = ?status, "root object submitted");
            return Ok(BootstrapOutcome::Done);
        }

        tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    tracing::info!(partition_id, "root bootstrap cancelled");
                    return Ok(BootstrapOutcome::Cancelled);
                }
            }
            _ = tokio::time::sleep(BOOTSTRAP_RETRY_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ROOT_OBJECT_ID;
    use crate::testutil::{test_partition, TestPartition};
    use tessera_raft::PartitionStateMachine;

    #[tokio::test]
    async fn leader_submits_exactly_once() {
        let TestPartition {
            partition, raft, ..
        } = test_partition("bootstrap_leader");
        raft.set_leader(true);

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let outcome = run_root_bootstrap(partition.clone(), cancel_rx)
            .await
            .expect("bootstrap");
        assert_eq!(outcome, BootstrapOutcome::Done);

        let submitted = raft.submissions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].op, OpCode::CreateRootObject);
        // The mock store commits by applying inline, so the object exists now.
        assert!(partition.objects.has_root_object().expect("query"));
    }

    #[tokio::test]
    async fn follower_reaches_done_when_object_replicates_in() {
        let TestPartition {
            partition, raft, ..
        } = test_partition("bootstrap_follower");
        raft.set_leader(false);

        // Simulate a peer leader's earlier submission committing through
        // normal replication while we poll.
        let replicated = partition.clone();
        let installer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let root = RootObject {
                object_id: ROOT_OBJECT_ID,
                partition_id: replicated.partition_id(),
                create_unix_ms: 7,
            };
            let payload = serde_json::to_vec(&root).expect("serialize");
            replicated
                .apply(RaftEntry::new(OpCode::CreateRootObject, payload))
                .expect("apply replicated create");
        });

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let outcome = run_root_bootstrap(partition.clone(), cancel_rx)
            .await
            .expect("bootstrap");
        installer.await.expect("installer task");

        assert_eq!(outcome, BootstrapOutcome::Done);
        assert!(
            raft.submissions().is_empty(),
            "a follower that sees the object must never submit"
        );
    }

    #[tokio::test]
    async fn cancellation_wins_over_submission() {
        let TestPartition {
            partition, raft, ..
        } = test_partition("bootstrap_cancel");
        raft.set_leader(false);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_root_bootstrap(partition, cancel_rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_tx.send(true).expect("signal cancel");

        let outcome = handle.await.expect("join").expect("bootstrap");
        assert_eq!(outcome, BootstrapOutcome::Cancelled);
        assert!(raft.submissions().is_empty());
    }

    #[tokio::test]
    async fn submission_failure_is_fatal() {
        let TestPartition {
            partition, raft, ..
        } = test_partition("bootstrap_fatal");
        raft.set_leader(true);
        raft.fail_submissions(true);

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let err = run_root_bootstrap(partition, cancel_rx)
            .await
            .expect_err("submit failure must propagate");
        assert!(err.to_string().contains("submit root object"));
    }
}
