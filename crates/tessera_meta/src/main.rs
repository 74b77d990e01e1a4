// Tessera metadata node binary entry point.
//
// Wires together the local storage engine, the in-process replication store,
// the partition manager, and the root-object bootstrap loop for a single
// metadata partition, then runs until interrupted.

use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tessera_raft::{LocalRaftStore, NodeId, PartitionId};
use tokio::sync::watch;

use tessera_meta::{
    run_root_bootstrap, FileConfigStore, FjallObjectStore, MetaPartition, PartitionConfig,
    PartitionConfigStore, PartitionManager, PeerInfo, RaftPorts,
};

/// CLI options for running a node.
#[derive(Parser, Debug)]
#[command(name = "tessera-meta")]
struct NodeArgs {
    #[arg(long)]
    node_id: NodeId,

    #[arg(long, env = "TESSERA_DATA_DIR")]
    data_dir: PathBuf,

    #[arg(long, env = "TESSERA_PARTITION_ID", default_value_t = 1)]
    partition_id: PartitionId,

    /// Comma-separated list like: `1@10.0.0.1:9021,2@10.0.0.2:9021`
    #[arg(long)]
    initial_members: String,

    /// Local heartbeat port reapplied when registering replicas.
    #[arg(long, env = "TESSERA_HEARTBEAT_PORT", default_value_t = 9093)]
    heartbeat_port: u16,

    /// Local replication port reapplied when registering replicas.
    #[arg(long, env = "TESSERA_REPLICATION_PORT", default_value_t = 9094)]
    replication_port: u16,

    /// Upper key-range boundary when creating a fresh partition.
    #[arg(long, default_value_t = u64::MAX)]
    initial_end: u64,
}

#[tokio::main]
/// Parse CLI args, initialize logging, and run the node.
async fn main() -> anyhow::Result<()> {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = NodeArgs::parse();
    run_node(args).await
}

/// Initialize storage, the partition, and the bootstrap loop, then run until
/// ctrl-c.
async fn run_node(args: NodeArgs) -> anyhow::Result<()> {
    fs::create_dir_all(&args.data_dir).context("create data dir")?;
    let storage_dir = args.data_dir.join("storage");
    fs::create_dir_all(&storage_dir).context("create storage dir")?;
    let partition_root = args
        .data_dir
        .join("partitions")
        .join(args.partition_id.to_string());

    let keyspace = Arc::new(
        fjall::Config::new(&storage_dir)
            .open()
            .context("open fjall keyspace")?,
    );

    let conf_store = Arc::new(FileConfigStore::new());
    let config = match FileConfigStore::load(&partition_root)? {
        Some(config) => {
            tracing::info!(
                partition_id = config.partition_id,
                end = config.end,
                peers = config.peers.len(),
                "loaded existing partition config"
            );
            config
        }
        None => {
            let config = PartitionConfig {
                partition_id: args.partition_id,
                start: 0,
                end: args.initial_end,
                node_id: args.node_id,
                peers: parse_members(&args.initial_members)?,
                root_dir: partition_root.clone(),
            };
            conf_store.persist(&config)?;
            tracing::info!(
                partition_id = config.partition_id,
                peers = config.peers.len(),
                "created partition config"
            );
            config
        }
    };

    let raft = LocalRaftStore::new();
    let (manager, events_tx, events_rx) = PartitionManager::new();
    let objects = Arc::new(
        FjallObjectStore::open(keyspace.clone(), args.partition_id)
            .context("open object store")?,
    );
    let partition = MetaPartition::new(
        config,
        raft.clone(),
        conf_store,
        objects,
        events_tx,
        RaftPorts {
            heartbeat: args.heartbeat_port,
            replication: args.replication_port,
        },
    );
    raft.register_partition(args.partition_id, partition.clone());
    manager.insert(partition.clone());
    tokio::spawn(manager.clone().run_events(events_rx));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut bootstrap = tokio::spawn(run_root_bootstrap(partition, cancel_rx));
    tracing::info!(
        node_id = args.node_id,
        partition_id = args.partition_id,
        "tessera-meta node running"
    );

    tokio::select! {
        res = &mut bootstrap => {
            match res {
                Ok(Ok(outcome)) => {
                    tracing::info!(outcome = ?outcome, "root bootstrap finished");
                    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
                }
                // A failed bootstrap leaves the partition half-initialized;
                // the node must not keep serving it.
                Ok(Err(err)) => return Err(err.context("root object bootstrap failed")),
                Err(err) => anyhow::bail!("root bootstrap task failed: {err}"),
            }
        }
        sig = tokio::signal::ctrl_c() => {
            sig.context("wait for ctrl-c")?;
            let _ = cancel_tx.send(true);
            match bootstrap.await {
                Ok(Ok(outcome)) => tracing::info!(outcome = ?outcome, "root bootstrap stopped"),
                Ok(Err(err)) => tracing::error!(error = ?err, "root bootstrap failed during shutdown"),
                Err(err) => tracing::error!(error = %err, "root bootstrap task failed"),
            }
        }
    }

    tracing::info!("tessera-meta node shut down");
    Ok(())
}

/// Parse a `<id>@<host:port>` member list, rejecting duplicates.
fn parse_members(raw: &str) -> anyhow::Result<Vec<PeerInfo>> {
    let mut peers: Vec<PeerInfo> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, addr) = part
            .split_once('@')
            .ok_or_else(|| anyhow::anyhow!("invalid member entry {part:?}, expected <id>@<host:port>"))?;
        let id: NodeId = id
            .parse()
            .with_context(|| format!("invalid member id in {part:?}"))?;
        if peers.iter().any(|p| p.id == id) {
            anyhow::bail!("duplicate member id {id}");
        }
        peers.push(PeerInfo {
            id,
            addr: addr.to_string(),
        });
    }
    if peers.is_empty() {
        anyhow::bail!("initial members cannot be empty");
    }
    Ok(peers)
}
