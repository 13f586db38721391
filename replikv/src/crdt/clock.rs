//! Vector clocks and their causal comparison.
//!
//! Slot `i` of a clock counts the writes originated by node `i + 1`. A node
//! only ever increments its own slot; knowledge about other nodes grows by
//! [`VectorClock::merge`], which takes the pointwise maximum.
//!
//! ```text
//!   a = [1, 0, 0]   b = [0, 1, 0]   → Conflict  (neither dominates)
//!   a = [1, 1, 0]   b = [1, 0, 0]   → After
//!   a = [1, 0, 0]   b = [1, 1, 0]   → Before
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Outcome of comparing two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockOrdering {
    /// Every slot is `<=` and at least one is `<`.
    Before,
    /// All slots match.
    Equal,
    /// Every slot is `>=` and at least one is `>`.
    After,
    /// Neither clock dominates: the writes are concurrent.
    Conflict,
}

/// Causal timestamp: one counter per cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VectorClock(Vec<u64>);

impl VectorClock {
    /// An all-zero clock for a cluster of `node_count` nodes.
    pub fn new(node_count: u32) -> Self {
        Self(vec![0; node_count as usize])
    }

    /// Counter of `node`. Slots beyond the clock's length read as zero.
    pub fn get(&self, node: NodeId) -> u64 {
        self.0.get(node.slot()).copied().unwrap_or(0)
    }

    /// Count one more write originated by `node`.
    pub fn increment(&mut self, node: NodeId) {
        let slot = node.slot();
        if slot >= self.0.len() {
            self.0.resize(slot + 1, 0);
        }
        self.0[slot] += 1;
    }

    /// Fold `other` into this clock by pointwise maximum.
    pub fn merge(&mut self, other: &VectorClock) {
        if other.0.len() > self.0.len() {
            self.0.resize(other.0.len(), 0);
        }
        for (mine, theirs) in self.0.iter_mut().zip(&other.0) {
            *mine = (*mine).max(*theirs);
        }
    }

    /// Causal relation of `self` to `other`.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let len = self.0.len().max(other.0.len());
        let mut less = false;
        let mut greater = false;
        for slot in 0..len {
            let mine = self.0.get(slot).copied().unwrap_or(0);
            let theirs = other.0.get(slot).copied().unwrap_or(0);
            match mine.cmp(&theirs) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
        }
        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Conflict,
        }
    }

    /// Total number of writes the clock has observed.
    ///
    /// Strictly increases along happens-before, which makes it usable as the
    /// primary key of a total order over writes.
    pub fn sum(&self) -> u64 {
        self.0.iter().sum()
    }

    /// Raw counters, slot `i` belonging to node `i + 1`.
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }
}

impl From<Vec<u64>> for VectorClock {
    fn from(counters: Vec<u64>) -> Self {
        Self(counters)
    }
}

impl std::fmt::Display for VectorClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(counters: &[u64]) -> VectorClock {
        VectorClock::from(counters.to_vec())
    }

    #[test]
    fn test_compare_reflexive() {
        for c in [clock(&[0, 0, 0]), clock(&[3, 1, 4]), clock(&[0, 9, 0])] {
            assert_eq!(c.compare(&c), ClockOrdering::Equal);
        }
    }

    #[test]
    fn test_compare_examples() {
        assert_eq!(
            clock(&[1, 0, 0]).compare(&clock(&[0, 1, 0])),
            ClockOrdering::Conflict
        );
        assert_eq!(
            clock(&[1, 1, 0]).compare(&clock(&[1, 0, 0])),
            ClockOrdering::After
        );
        assert_eq!(
            clock(&[1, 0, 0]).compare(&clock(&[1, 1, 0])),
            ClockOrdering::Before
        );
    }

    #[test]
    fn test_compare_antisymmetric() {
        let samples = [
            clock(&[0, 0, 0]),
            clock(&[1, 0, 0]),
            clock(&[1, 1, 0]),
            clock(&[0, 2, 1]),
            clock(&[2, 2, 2]),
        ];
        for a in &samples {
            for b in &samples {
                let expected = match a.compare(b) {
                    ClockOrdering::Before => ClockOrdering::After,
                    ClockOrdering::After => ClockOrdering::Before,
                    other => other,
                };
                assert_eq!(b.compare(a), expected, "a={a} b={b}");
            }
        }
    }

    #[test]
    fn test_compare_pads_shorter_clock() {
        assert_eq!(clock(&[1]).compare(&clock(&[1, 0, 0])), ClockOrdering::Equal);
        assert_eq!(clock(&[1]).compare(&clock(&[1, 0, 2])), ClockOrdering::Before);
    }

    #[test]
    fn test_merge_is_pointwise_max() {
        let mut a = clock(&[3, 0, 2]);
        a.merge(&clock(&[1, 4, 2]));
        assert_eq!(a, clock(&[3, 4, 2]));
    }

    #[test]
    fn test_merge_laws() {
        let a = clock(&[1, 5, 0]);
        let b = clock(&[2, 0, 3]);
        let c = clock(&[0, 7, 1]);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba, "commutative");

        let mut ab_c = ab.clone();
        ab_c.merge(&c);
        let mut bc = b.clone();
        bc.merge(&c);
        let mut a_bc = a.clone();
        a_bc.merge(&bc);
        assert_eq!(ab_c, a_bc, "associative");

        let mut aa = a.clone();
        aa.merge(&a);
        assert_eq!(aa, a, "idempotent");
    }

    #[test]
    fn test_merge_result_dominates_inputs() {
        let a = clock(&[1, 0, 4]);
        let b = clock(&[0, 2, 1]);
        let mut merged = a.clone();
        merged.merge(&b);
        assert_eq!(a.compare(&merged), ClockOrdering::Before);
        assert_eq!(b.compare(&merged), ClockOrdering::Before);
    }

    #[test]
    fn test_increment_own_slot() {
        let mut c = VectorClock::new(3);
        c.increment(NodeId::new(2));
        c.increment(NodeId::new(2));
        assert_eq!(c, clock(&[0, 2, 0]));
        assert_eq!(c.get(NodeId::new(2)), 2);
        assert_eq!(c.get(NodeId::new(3)), 0);
        assert_eq!(c.sum(), 2);
    }
}
