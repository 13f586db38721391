//! Raft replication across an in-process cluster.
//!
//! Node 1 gets a 1 s election timeout and node 2 a 5 s one, both without
//! jitter, so node 1 wins the first election and node 2 the one after node 1
//! is cut off. Node 3 keeps the default 10-11 s.
//!
//! Tests that let partitioned nodes rejoin use [`start_tuned`], which keeps
//! every election timeout above a 1 s heartbeat.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use replikv::error::{ClientError, TransportError};
use replikv::{ClusterConfig, NodeId, RaftCluster, RaftSettings, Role};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn start(node_count: u32) -> RaftCluster {
    init_tracing();
    let config = ClusterConfig::builder(NodeId::new(1), node_count)
        .cookie("raft-test")
        .build()
        .expect("valid config");

    RaftCluster::start_with(&config, |node| {
        let election_timeout = match node.node_id().0 {
            1 => Duration::from_secs(1),
            2 => Duration::from_secs(5),
            _ => return Ok(node),
        };
        node.with_raft(RaftSettings {
            election_timeout,
            election_jitter: Duration::ZERO,
            ..RaftSettings::default()
        })
    })
    .expect("cluster starts")
}

/// Cluster of three with a 1 s heartbeat and the given jitter-free election
/// timeouts, in seconds, for nodes 1 to 3.
fn start_tuned(timeouts: [u64; 3]) -> RaftCluster {
    init_tracing();
    let config = ClusterConfig::builder(NodeId::new(1), 3)
        .cookie("raft-test")
        .build()
        .expect("valid config");

    RaftCluster::start_with(&config, |node| {
        let slot = node.node_id().slot();
        node.with_raft(RaftSettings {
            election_timeout: Duration::from_secs(timeouts[slot]),
            election_jitter: Duration::ZERO,
            heartbeat_interval: Duration::from_secs(1),
            ..RaftSettings::default()
        })
    })
    .expect("cluster starts")
}

async fn leaders_by_term(cluster: &RaftCluster, seen: &mut HashMap<u64, HashSet<NodeId>>) {
    for (slot, node) in cluster.nodes().iter().enumerate() {
        let status = node.status().await.expect("status");
        if status.role == Role::Leader {
            seen.entry(status.term)
                .or_default()
                .insert(NodeId::new(slot as u32 + 1));
        }
    }
}

/// Node 1's first election completes at t = 1 s.
async fn wait_for_leader() {
    tokio::time::sleep(Duration::from_secs(2)).await;
}

#[tokio::test(start_paused = true)]
async fn test_first_election() {
    let cluster = start(3);
    wait_for_leader().await;

    let leader = cluster
        .node(NodeId(1))
        .expect("node 1")
        .status()
        .await
        .expect("status");
    assert_eq!(leader.role, Role::Leader);
    assert_eq!(leader.term, 1);
    assert_eq!(leader.voted_for, Some(NodeId(1)));

    for id in [NodeId(2), NodeId(3)] {
        let status = cluster
            .node(id)
            .expect("follower")
            .status()
            .await
            .expect("status");
        assert_eq!(status.role, Role::Follower);
        assert_eq!(status.term, 1);
        assert_eq!(status.voted_for, Some(NodeId(1)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_write_commits_and_replicates() {
    let cluster = start(3);
    wait_for_leader().await;
    let leader = cluster.node(NodeId(1)).expect("node 1");

    let id = leader.set("k", "v").await.expect("committed");
    assert_eq!(id, 0);
    assert_eq!(leader.get("k").await.expect("get"), Some("v".into()));

    let mut holders = 0;
    for node in cluster.nodes() {
        if node.status().await.expect("status").log_len >= 1 {
            holders += 1;
        }
    }
    assert!(holders >= 2, "a committed entry is held by a majority");

    // Followers learn the new commit index on the next round.
    tokio::time::sleep(Duration::from_secs(4)).await;
    for node in cluster.nodes() {
        assert_eq!(node.get("k").await.expect("get"), Some("v".into()));
        let status = node.status().await.expect("status");
        assert_eq!(status.commit_index, Some(0));
        assert_eq!(status.log_len, 1);
    }

    let id = leader.delete("k").await.expect("committed");
    assert_eq!(id, 1);
    assert_eq!(leader.get("k").await.expect("get"), None);
}

#[tokio::test(start_paused = true)]
async fn test_follower_rejects_writes() {
    let cluster = start(3);
    wait_for_leader().await;

    let follower = cluster.node(NodeId(2)).expect("node 2");
    let err = follower.set("k", "v").await.expect_err("not the leader");
    assert_eq!(err, ClientError::NotLeader);
    assert_eq!(follower.status().await.expect("status").log_len, 0);
}

#[tokio::test(start_paused = true)]
async fn test_commit_index_is_monotonic() {
    let cluster = start(3);
    wait_for_leader().await;
    let leader = cluster.node(NodeId(1)).expect("node 1");

    let mut last = vec![None; 3];
    for i in 0..12u64 {
        leader
            .set(format!("k{i}"), i.to_string())
            .await
            .expect("committed");
        for (slot, node) in cluster.nodes().iter().enumerate() {
            let commit = node.status().await.expect("status").commit_index;
            assert!(commit >= last[slot], "commit index went back on node {}", slot + 1);
            last[slot] = commit;
        }
    }
    assert_eq!(last[0], Some(11));
}

#[tokio::test(start_paused = true)]
async fn test_isolated_leader_cannot_commit_and_is_replaced() {
    let cluster = start(3);
    wait_for_leader().await;
    let node1 = cluster.node(NodeId(1)).expect("node 1");
    let node2 = cluster.node(NodeId(2)).expect("node 2");
    let node3 = cluster.node(NodeId(3)).expect("node 3");

    node1.set("before", "1").await.expect("committed");
    tokio::time::sleep(Duration::from_secs(4)).await;

    cluster.network().isolate(NodeId(1));
    let err = node1.set("lost", "x").await.expect_err("no majority");
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::Timeout(_))
    ));
    assert_eq!(node1.status().await.expect("status").commit_index, Some(0));

    let status = node2.status().await.expect("status");
    assert_eq!(status.role, Role::Leader);
    assert_eq!(status.term, 2);

    let id = node2.set("after", "2").await.expect("committed");
    assert_eq!(id, 1);
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(node3.get("after").await.expect("get"), Some("2".into()));
    assert_eq!(node3.get("before").await.expect("get"), Some("1".into()));
    assert_eq!(node1.get("lost").await.expect("get"), None);
    assert_eq!(node1.get("after").await.expect("get"), None);
}

#[tokio::test(start_paused = true)]
async fn test_competing_candidates_elect_one_leader_per_term() {
    // Nodes 1 and 2 time out together; each waits on the other's vote until
    // the call timeout while node 3 votes for whichever asked first.
    let cluster = start_tuned([2, 2, 10]);
    tokio::time::sleep(Duration::from_secs(9)).await;

    let mut seen = HashMap::new();
    for _ in 0..20 {
        leaders_by_term(&cluster, &mut seen).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    for (term, leaders) in &seen {
        assert!(leaders.len() <= 1, "term {term} had leaders {leaders:?}");
    }
    let leaders = seen.get(&1).expect("a leader in term 1");
    let leader = *leaders.iter().next().expect("one leader");
    assert!(leader == NodeId(1) || leader == NodeId(2));

    for node in cluster.nodes() {
        let status = node.status().await.expect("status");
        assert_eq!(status.term, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_old_leader_rejoins_and_adopts_newer_log() {
    let cluster = start_tuned([2, 4, 8]);
    tokio::time::sleep(Duration::from_secs(3)).await;
    let node1 = cluster.node(NodeId(1)).expect("node 1");
    let node2 = cluster.node(NodeId(2)).expect("node 2");

    node1.set("before", "1").await.expect("committed");
    tokio::time::sleep(Duration::from_secs(2)).await;

    cluster.network().isolate(NodeId(1));
    let err = node1.set("lost", "x").await.expect_err("no majority");
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::Timeout(_))
    ));

    let status = node2.status().await.expect("status");
    assert_eq!(status.role, Role::Leader);
    assert_eq!(status.term, 2);
    assert_eq!(node2.set("after", "2").await.expect("committed"), 1);

    cluster.network().heal();
    tokio::time::sleep(Duration::from_secs(5)).await;

    for node in cluster.nodes() {
        assert_eq!(node.get("before").await.expect("get"), Some("1".into()));
        assert_eq!(node.get("after").await.expect("get"), Some("2".into()));
        assert_eq!(node.get("lost").await.expect("get"), None);
        let status = node.status().await.expect("status");
        assert_eq!(status.term, 2);
        assert_eq!(status.commit_index, Some(1));
        assert_eq!(status.log_len, 2);
    }
    assert_eq!(node1.status().await.expect("status").role, Role::Follower);
    assert_eq!(node2.status().await.expect("status").role, Role::Leader);
}
