//! Nodes that each run on their own network and reach their peers over TCP,
//! as they do when every node is a separate process.
//!
//! These tests use the real clock and fixed localhost port ranges.

use std::time::Duration;

use replikv::{
    ClusterConfig, CrdtHandle, NodeId, RaftHandle, RaftSettings, Role, start_crdt_process,
    start_raft_process,
};
use tokio::net::TcpListener;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn config(id: u32, node_count: u32, cookie: &str, peer_port: u16) -> ClusterConfig {
    ClusterConfig::builder(NodeId::new(id), node_count)
        .cookie(cookie)
        .peer_port(peer_port)
        .retry_interval(Duration::from_millis(100))
        .build()
        .expect("valid config")
}

async fn bind(config: &ClusterConfig) -> TcpListener {
    TcpListener::bind(("127.0.0.1", config.peer_port()))
        .await
        .expect("bind peer port")
}

async fn crdt_node(id: u32, cookie: &str, peer_port: u16) -> CrdtHandle {
    let config = config(id, 2, cookie, peer_port);
    let listener = bind(&config).await;
    start_crdt_process(&config, listener).expect("node starts")
}

async fn eventually_reads(node: &CrdtHandle, key: &str) -> Option<String> {
    for _ in 0..30 {
        if let Some(value) = node.read(key).await.expect("read") {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

#[tokio::test]
async fn test_crdt_write_crosses_processes() {
    init_tracing();
    let node1 = crdt_node(1, "tcp-test", 41_000).await;
    let node2 = crdt_node(2, "tcp-test", 41_000).await;

    node1.write("k", "v").expect("write");
    assert_eq!(eventually_reads(&node2, "k").await, Some("v".into()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(node1.pending_retries().await.expect("pending"), 0);
}

#[tokio::test]
async fn test_crdt_peer_with_other_cookie_never_receives() {
    init_tracing();
    let node1 = crdt_node(1, "tcp-test", 41_100).await;
    let node2 = crdt_node(2, "intruder", 41_100).await;

    node1.write("k", "v").expect("write");
    assert_eq!(eventually_reads(&node2, "k").await, None);
    assert_eq!(node1.pending_retries().await.expect("pending"), 1);
}

#[tokio::test]
async fn test_raft_cluster_across_processes() {
    init_tracing();
    let mut nodes: Vec<RaftHandle> = Vec::new();
    for id in 1..=3u32 {
        let config = config(id, 3, "tcp-test", 41_200)
            .with_raft(RaftSettings {
                election_timeout: Duration::from_millis(300 * u64::from(id)),
                election_jitter: Duration::ZERO,
                heartbeat_interval: Duration::from_millis(100),
                call_timeout: Duration::from_millis(500),
                ..RaftSettings::default()
            })
            .expect("valid config");
        let listener = bind(&config).await;
        nodes.push(start_raft_process(&config, listener).expect("node starts"));
    }

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(nodes[0].status().await.expect("status").role, Role::Leader);

    assert_eq!(nodes[0].set("k", "v").await.expect("committed"), 0);
    tokio::time::sleep(Duration::from_millis(300)).await;
    for node in &nodes {
        assert_eq!(node.get("k").await.expect("get"), Some("v".into()));
    }
}
