//! CRDT replication across an in-process cluster.

use std::time::Duration;

use replikv::crdt::{CrdtMessage, CrdtRow, NewRow};
use replikv::{ClusterConfig, CrdtCluster, NodeId, TieBreak, VectorClock};

const RETRY: Duration = Duration::from_secs(1);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn start(node_count: u32, tie_break: TieBreak) -> CrdtCluster {
    init_tracing();
    let config = ClusterConfig::builder(NodeId::new(1), node_count)
        .cookie("crdt-test")
        .retry_interval(RETRY)
        .tie_break(tie_break)
        .build()
        .expect("valid config");
    CrdtCluster::start(&config).expect("cluster starts")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn values(cluster: &CrdtCluster, key: &str) -> Vec<Option<String>> {
    let mut out = Vec::new();
    for node in cluster.nodes() {
        out.push(node.read(key).await.expect("read"));
    }
    out
}

async fn total_pending(cluster: &CrdtCluster) -> usize {
    let mut total = 0;
    for node in cluster.nodes() {
        total += node.pending_retries().await.expect("pending");
    }
    total
}

#[tokio::test(start_paused = true)]
async fn test_write_reaches_every_node() {
    let cluster = start(3, TieBreak::LocalThreshold);
    let node2 = cluster.node(NodeId(2)).expect("node 2");

    node2.write("greeting", "hello").expect("write");
    settle().await;

    assert_eq!(values(&cluster, "greeting").await, vec![Some("hello".to_string()); 3]);
    assert_eq!(values(&cluster, "missing").await, vec![None; 3]);
    assert_eq!(total_pending(&cluster).await, 0);

    for node in cluster.nodes() {
        assert_eq!(node.clock().await.expect("clock").as_slice(), &[0, 1, 0]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_sequential_writes_converge() {
    let cluster = start(3, TieBreak::LocalThreshold);

    for (i, node) in cluster.nodes().iter().enumerate() {
        node.write("k", format!("v{i}")).expect("write");
        settle().await;
    }

    assert_eq!(values(&cluster, "k").await, vec![Some("v2".to_string()); 3]);
    let snapshot = cluster
        .node(NodeId(1))
        .expect("node 1")
        .snapshot("k")
        .await
        .expect("snapshot")
        .expect("stored");
    assert_eq!(snapshot.origin, NodeId(3));
    assert_eq!(snapshot.timestamp, VectorClock::from(vec![1, 1, 1]));
}

#[tokio::test(start_paused = true)]
async fn test_partitioned_peer_catches_up_after_heal() {
    let cluster = start(3, TieBreak::LocalThreshold);
    let network = cluster.network();
    network.partition(NodeId(1), NodeId(3));

    let node1 = cluster.node(NodeId(1)).expect("node 1");
    node1.write("k", "v").expect("write");
    tokio::time::sleep(RETRY * 3).await;

    assert_eq!(
        values(&cluster, "k").await,
        vec![Some("v".to_string()), Some("v".to_string()), None]
    );
    assert_eq!(node1.pending_retries().await.expect("pending"), 1);

    network.heal();
    tokio::time::sleep(RETRY + Duration::from_millis(100)).await;

    assert_eq!(values(&cluster, "k").await, vec![Some("v".to_string()); 3]);
    assert_eq!(total_pending(&cluster).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_row_is_noop() {
    let cluster = start(2, TieBreak::LocalThreshold);
    let network = cluster.network();
    let row = NewRow {
        from: NodeId(1),
        row: CrdtRow {
            key: "k".into(),
            value: "v".into(),
            timestamp: VectorClock::from(vec![1, 0]),
        },
    };

    for _ in 0..3 {
        network
            .send(NodeId(1), NodeId(2), &CrdtMessage::NewRow(row.clone()))
            .expect("send");
    }
    settle().await;

    let node2 = cluster.node(NodeId(2)).expect("node 2");
    assert_eq!(node2.read("k").await.expect("read"), Some("v".into()));
    assert_eq!(node2.clock().await.expect("clock").as_slice(), &[1, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_equal_clock_conflict_restarts_replica() {
    let cluster = start(2, TieBreak::LocalThreshold);
    let network = cluster.network();
    let row = |value: &str| {
        CrdtMessage::NewRow(NewRow {
            from: NodeId(1),
            row: CrdtRow {
                key: "k".into(),
                value: value.into(),
                timestamp: VectorClock::from(vec![7, 0]),
            },
        })
    };

    network.send(NodeId(1), NodeId(2), &row("a")).expect("send");
    network.send(NodeId(1), NodeId(2), &row("b")).expect("send");
    settle().await;

    let node2 = cluster.node(NodeId(2)).expect("node 2");
    assert_eq!(node2.read("k").await.expect("read"), None, "state reset");
    assert_eq!(node2.clock().await.expect("clock").as_slice(), &[0, 0]);
}

/// Node 1 writes A while node 2, cut off, writes B to the same key. Node 3
/// sees A first.
async fn concurrent_writes(cluster: &CrdtCluster) {
    let network = cluster.network();
    network.isolate(NodeId(2));

    cluster
        .node(NodeId(1))
        .expect("node 1")
        .write("k", "A")
        .expect("write");
    cluster
        .node(NodeId(2))
        .expect("node 2")
        .write("k", "B")
        .expect("write");
    settle().await;

    network.reconnect(NodeId(2));
    tokio::time::sleep(RETRY * 2).await;
    assert_eq!(total_pending(cluster).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_local_threshold_can_diverge() {
    let cluster = start(3, TieBreak::LocalThreshold);
    concurrent_writes(&cluster).await;

    // Node 3 keeps B because 2 < 3; nodes 1 and 2 keep A because 1 < 2.
    assert_eq!(
        values(&cluster, "k").await,
        vec![Some("A".to_string()), Some("A".to_string()), Some("B".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_causal_total_order_converges() {
    let cluster = start(3, TieBreak::CausalTotalOrder);
    concurrent_writes(&cluster).await;

    assert_eq!(values(&cluster, "k").await, vec![Some("A".to_string()); 3]);
    for node in cluster.nodes() {
        assert_eq!(node.clock().await.expect("clock").as_slice(), &[1, 1, 0]);
    }
}
