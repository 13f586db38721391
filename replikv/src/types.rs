//! Cluster-wide identity types.
//!
//! - [`NodeId`]: a member of the fixed cluster, numbered `1..=N`

use serde::{Deserialize, Serialize};

/// Identifier of a cluster member.
///
/// Node ids are 1-based and dense: a cluster of `N` nodes uses ids `1..=N`.
/// Node `i` owns slot `i - 1` of every vector clock and is addressed on the
/// network as `node-{i}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Create a node id.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The vector clock slot owned by this node.
    pub const fn slot(self) -> usize {
        (self.0 as usize).saturating_sub(1)
    }

    /// Network name of this node, following the `node-{id}` convention.
    pub fn name(self) -> String {
        format!("node-{}", self.0)
    }

    /// Iterate over every node id of a cluster of `count` members.
    pub fn all(count: u32) -> impl Iterator<Item = NodeId> {
        (1..=count).map(NodeId)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_slot() {
        assert_eq!(NodeId::new(1).slot(), 0);
        assert_eq!(NodeId::new(3).slot(), 2);
    }

    #[test]
    fn test_node_id_naming() {
        assert_eq!(NodeId::new(2).name(), "node-2");
        assert_eq!(NodeId::new(7).to_string(), "node-7");
    }

    #[test]
    fn test_all_nodes() {
        let ids: Vec<_> = NodeId::all(3).collect();
        assert_eq!(ids, vec![NodeId(1), NodeId(2), NodeId(3)]);
    }
}
