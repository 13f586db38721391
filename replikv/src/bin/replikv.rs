//! Run replikv nodes.
//!
//! With `--node-id`, this process runs that one node. It serves HTTP on
//! `api-port + id - 1` and peer traffic on `peer-port + id - 1`; peers are
//! found at `peer-host` with `{id}` replaced by their id:
//!
//! ```text
//! replikv --mode raft --node-count 3 --node-id 1 --cookie s3cret
//! replikv --mode raft --node-count 3 --node-id 2 --cookie s3cret
//! replikv --mode raft --node-count 3 --node-id 3 --cookie s3cret
//! curl -X POST localhost:5000/greeting -d '"hello"'
//! ```
//!
//! Without it, the whole cluster runs in this process and node `i` serves
//! HTTP on `api-port + i - 1`:
//!
//! ```text
//! replikv --mode crdt --node-count 3 --api-port 5000
//! curl localhost:5001/greeting
//! ```

use std::time::Duration;

use axum::Router;
use clap::Parser;
use replikv::{
    ClusterConfig, CrdtCluster, NodeId, RaftCluster, ReplicationMode, TieBreak, crdt_router,
    raft_router, start_crdt_process, start_raft_process,
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "replikv")]
#[command(about = "Replicated key-value store", long_about = None)]
struct Args {
    /// Replication strategy
    #[arg(long, value_enum, default_value_t = ReplicationMode::Crdt)]
    mode: ReplicationMode,

    /// Number of nodes in the cluster
    #[arg(long, default_value_t = 3)]
    node_count: u32,

    /// Run only this node; the other nodes run in their own processes
    #[arg(long, requires = "cookie")]
    node_id: Option<u32>,

    /// Cluster cookie; random when the whole cluster runs in this process
    #[arg(long)]
    cookie: Option<String>,

    /// HTTP port of node 1; node i listens on api-port + i - 1
    #[arg(long, default_value_t = 5000)]
    api_port: u16,

    /// Peer port of node 1; node i listens on peer-port + i - 1
    #[arg(long, default_value_t = 6000)]
    peer_port: u16,

    /// Host peers are reached at; `{id}` is replaced by the peer's node id
    #[arg(long, default_value = "127.0.0.1")]
    peer_host: String,

    /// CRDT retry interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    retry_interval_ms: u64,

    /// CRDT tie-break policy for concurrent writes
    #[arg(long, value_enum, default_value_t = TieBreak::LocalThreshold)]
    tie_break: TieBreak,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let own_id = NodeId::new(args.node_id.unwrap_or(1));
    let mut builder = ClusterConfig::builder(own_id, args.node_count)
        .http_port(args.api_port)
        .peer_port(args.peer_port)
        .peer_host(args.peer_host)
        .retry_interval(Duration::from_millis(args.retry_interval_ms))
        .tie_break(args.tie_break);
    if let Some(cookie) = args.cookie {
        builder = builder.cookie(cookie);
    }
    let config = builder.build()?;

    let routers: Vec<(u16, Router)> = match args.node_id {
        Some(_) => {
            tracing::info!(mode = ?args.mode, node = %own_id, nodes = args.node_count, "starting node");
            let listener = TcpListener::bind(("0.0.0.0", config.peer_port())).await?;
            let router = match args.mode {
                ReplicationMode::Crdt => crdt_router(start_crdt_process(&config, listener)?),
                ReplicationMode::Raft => raft_router(start_raft_process(&config, listener)?),
            };
            vec![(config.http_port(), router)]
        }
        None => {
            tracing::info!(mode = ?args.mode, nodes = args.node_count, "starting cluster");
            let handles: Vec<Router> = match args.mode {
                ReplicationMode::Crdt => {
                    let cluster = CrdtCluster::start(&config)?;
                    cluster.nodes().iter().cloned().map(crdt_router).collect()
                }
                ReplicationMode::Raft => {
                    let cluster = RaftCluster::start(&config)?;
                    cluster.nodes().iter().cloned().map(raft_router).collect()
                }
            };
            let mut routers = Vec::with_capacity(handles.len());
            for (id, router) in NodeId::all(args.node_count).zip(handles) {
                routers.push((config.for_node(id)?.http_port(), router));
            }
            routers
        }
    };

    let mut servers = Vec::with_capacity(routers.len());
    for (port, router) in routers {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!(port, "http façade listening");
        servers.push(tokio::spawn(async move { axum::serve(listener, router).await }));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    for server in servers {
        server.abort();
    }
    Ok(())
}
