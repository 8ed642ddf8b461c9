//! The mutable, lock-per-node graph built during `build` and kept in memory
//! for a sealed (non-mmap) index.
//!
//! Neighbor lists are stored by [`PointId`] (never by pointer), so the whole
//! structure can be relocated, serialized, or memory-mapped without a
//! pointer-fixup pass. Each node carries its own lock; mutation of
//! a node's adjacency lists never blocks on any other node's lock.

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::types::{EntryPoint, PointId};

/// Read-only view over a graph's adjacency, implemented both by the
/// in-memory [`LiveGraph`] used during/after a non-mmap build and by the
/// mmap-backed reader in [`crate::serialize`]. The search engine is generic
/// over this trait so it never needs to know which backend it's querying.
pub trait GraphReader: Send + Sync {
    fn len(&self) -> usize;
    fn level(&self, id: PointId) -> usize;
    /// Neighbor ids of `id` at `level`, or an empty vec if `id`'s top level
    /// is below `level`.
    fn neighbors(&self, id: PointId, level: usize) -> Vec<PointId>;
    fn entry_point(&self) -> EntryPoint;
}

struct LiveNode {
    level: usize,
    /// `adjacency[l]` holds node's neighbor list at level `l`, for
    /// `l` in `0..=level`. Guarded by one lock per node, not one lock per
    /// level, since insertion touches every level of a node together.
    adjacency: Mutex<Vec<Vec<PointId>>>,
}

/// The graph under construction (and, for non-mmap sealed indexes, the
/// graph at rest).
pub struct LiveGraph {
    nodes: Vec<LiveNode>,
    entry: RwLock<EntryPoint>,
}

impl LiveGraph {
    /// Build an empty graph with one node per entry in `levels` (the
    /// per-node top level assigned during the builder's serial
    /// level-assignment phase).
    pub fn new(levels: &[usize]) -> Self {
        let nodes = levels
            .iter()
            .map(|&level| LiveNode {
                level,
                adjacency: Mutex::new(vec![Vec::new(); level + 1]),
            })
            .collect();
        Self {
            nodes,
            entry: RwLock::new(EntryPoint {
                id: PointId(0),
                level: levels.first().copied().unwrap_or(0),
            }),
        }
    }

    pub fn lock(&self, id: PointId) -> MutexGuard<'_, Vec<Vec<PointId>>> {
        self.nodes[id.index()].adjacency.lock()
    }

    /// Promote the entry point to `id` if its level exceeds the current
    /// entry point's. Equivalent to a compare-and-swap
    /// guarded by the entry point's own lock rather than an atomic, since
    /// the update is rare (once per level "record") relative to reads.
    pub fn maybe_promote_entry_point(&self, id: PointId, level: usize) {
        let mut entry = self.entry.write();
        if level > entry.level {
            *entry = EntryPoint { id, level };
        }
    }

    pub fn set_entry_point(&self, entry: EntryPoint) {
        *self.entry.write() = entry;
    }
}

impl GraphReader for LiveGraph {
    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn level(&self, id: PointId) -> usize {
        self.nodes[id.index()].level
    }

    fn neighbors(&self, id: PointId, level: usize) -> Vec<PointId> {
        let node = &self.nodes[id.index()];
        if level > node.level {
            return Vec::new();
        }
        node.adjacency.lock()[level].clone()
    }

    fn entry_point(&self) -> EntryPoint {
        *self.entry.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_graph_has_empty_adjacency_at_every_level() {
        let g = LiveGraph::new(&[2, 0, 1]);
        assert_eq!(g.len(), 3);
        assert!(g.neighbors(PointId(0), 0).is_empty());
        assert!(g.neighbors(PointId(0), 2).is_empty());
    }

    #[test]
    fn neighbors_above_a_nodes_level_are_empty() {
        let g = LiveGraph::new(&[0, 0]);
        assert!(g.neighbors(PointId(0), 1).is_empty());
    }

    #[test]
    fn entry_point_promotes_only_on_strictly_higher_level() {
        let g = LiveGraph::new(&[0, 3, 1]);
        g.set_entry_point(EntryPoint {
            id: PointId(0),
            level: 0,
        });
        g.maybe_promote_entry_point(PointId(2), 1);
        assert_eq!(g.entry_point().id, PointId(2));
        g.maybe_promote_entry_point(PointId(0), 0);
        assert_eq!(g.entry_point().id, PointId(2), "lower level must not win");
    }
}
