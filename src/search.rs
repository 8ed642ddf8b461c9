//! The search engine: greedy upper-layer descent and layer-0 beam search
//! and layer-0 beam search, plus the scratch-space pooling used by both queries and
//! construction.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use ordered_float::OrderedFloat;
use parking_lot::Mutex;

use crate::graph::GraphReader;
use crate::point::{distance_to_query, VectorSource};
use crate::types::{Candidate, PointId};
use crate::visited::{VisitedList, VisitedPool};

/// Mutable scratch state for one in-flight search.
///
/// Reused across searches (and, during construction, across insertions) so
/// that neither the visited-node array nor the candidate/result buffers are
/// reallocated per call. Generalized over [`GraphReader`] instead of a
/// single concrete graph representation.
pub struct Search {
    visited: VisitedList,
    /// Frontier candidates still to expand (`C` in the HNSW paper).
    candidates: BinaryHeap<Reverse<Candidate>>,
    /// Best-so-far results, always sorted nearest-first and truncated to
    /// `ef` (`W` in the paper).
    nearest: Vec<Candidate>,
    ef: usize,
}

impl Search {
    pub fn new(visited_pool: &VisitedPool) -> Self {
        Self {
            visited: visited_pool.acquire(),
            candidates: BinaryHeap::new(),
            nearest: Vec::new(),
            ef: 1,
        }
    }

    pub fn reset(&mut self) {
        self.candidates.clear();
        self.nearest.clear();
        self.visited.reset();
    }

    /// Track `pid` as a potential result, computing its distance to
    /// `query` and ignoring it if already visited in this search.
    fn push(&mut self, pid: PointId, query: &[f32], store: &dyn VectorSource) {
        if !self.visited.insert(pid) {
            return;
        }

        let distance = OrderedFloat(distance_to_query(store, query, pid));
        let candidate = Candidate { distance, pid };
        let idx = match self.nearest.binary_search(&candidate) {
            Err(idx) if idx < self.ef => idx,
            Err(_) => return,
            Ok(_) => return,
        };

        self.nearest.insert(idx, candidate);
        self.candidates.push(Reverse(candidate));
    }

    /// Seed the search with a single entry point.
    pub fn seed(&mut self, entry: PointId, query: &[f32], store: &dyn VectorSource) {
        self.push(entry, query, store);
    }

    /// Run the beam search loop (HNSW paper, algorithm 2) at a single
    /// layer, expanding frontier candidates until none can improve on the
    /// worst currently-kept result.
    pub fn search_layer(
        &mut self,
        query: &[f32],
        graph: &dyn GraphReader,
        store: &dyn VectorSource,
        level: usize,
        ef: usize,
    ) {
        self.ef = ef;
        while let Some(Reverse(candidate)) = self.candidates.pop() {
            if let Some(furthest) = self.nearest.last() {
                if candidate.distance > furthest.distance {
                    break;
                }
            }

            for neighbor in graph.neighbors(candidate.pid, level) {
                self.push(neighbor, query, store);
            }

            self.nearest.truncate(self.ef);
        }
    }

    /// Lower the search to the next level down: the current results seed
    /// both the next frontier and the visited set.
    pub fn cull(&mut self) {
        self.candidates.clear();
        for &candidate in &self.nearest {
            self.candidates.push(Reverse(candidate));
        }
        self.visited.reset();
        for &candidate in &self.nearest {
            self.visited.insert(candidate.pid);
        }
    }

    pub fn results(&self) -> &[Candidate] {
        &self.nearest
    }
}

/// A free list of [`Search`] scratch objects, so that `build` and
/// `batch_search` don't allocate fresh candidate heaps and result vectors
/// per insertion or per query.
pub struct ScratchPool {
    free: Mutex<Vec<Search>>,
    visited_pool: Arc<VisitedPool>,
}

impl ScratchPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            visited_pool: Arc::new(VisitedPool::new(capacity)),
        }
    }

    pub fn acquire(&self) -> Search {
        match self.free.lock().pop() {
            Some(search) => search,
            None => Search::new(&self.visited_pool),
        }
    }

    pub fn release(&self, search: Search) {
        self.free.lock().push(search);
    }
}

/// Run a full query: descend greedily through the upper layers (`ef = 1`),
/// then beam-search layer 0 with the caller's `ef`. Returns the `ef`-best
/// candidates, nearest first; callers truncate to `k`.
pub fn run_query(
    query: &[f32],
    ef: usize,
    graph: &dyn GraphReader,
    store: &dyn VectorSource,
    scratch: &mut Search,
) -> Vec<Candidate> {
    scratch.reset();
    if graph.len() == 0 {
        return Vec::new();
    }

    let entry = graph.entry_point();
    scratch.seed(entry.id, query, store);
    for level in (0..=entry.level).rev() {
        let layer_ef = if level == 0 { ef } else { 1 };
        scratch.search_layer(query, graph, store, level, layer_ef);
        if level > 0 {
            scratch.cull();
        }
    }

    scratch.results().to_vec()
}
