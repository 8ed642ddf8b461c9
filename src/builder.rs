//! Multi-threaded graph construction.
//!
//! Level assignment happens serially, up front, from a single seeded RNG so
//! that an `n_threads = 1` build is fully reproducible; insertion of
//! the remaining nodes is then farmed out to a `rayon` thread pool, with
//! per-node locks on [`LiveGraph`] serializing adjacency mutation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::graph::{GraphReader, LiveGraph};
use crate::heuristic::select_neighbors;
use crate::point::{distance_between, VectorSource};
use crate::search::ScratchPool;
use crate::types::{Candidate, EntryPoint, PointId};

/// Tunable parameters for one `build` call.
#[derive(Clone, Copy, Debug)]
pub struct BuildParams {
    pub m: usize,
    pub m0: usize,
    pub ef_construction: usize,
    pub seed: u64,
    pub n_threads: usize,
}

impl BuildParams {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.m == 0 {
            return Err(Error::invalid_arg("m", "must be greater than zero"));
        }
        if self.m0 == 0 {
            return Err(Error::invalid_arg("m0", "must be greater than zero"));
        }
        if self.ef_construction < self.m0.max(self.m) {
            return Err(Error::invalid_arg(
                "ef_construction",
                "must be at least max(m, m0)",
            ));
        }
        Ok(())
    }
}

/// Sample a node's top level from the truncated geometric distribution the
/// HNSW paper uses: `L = floor(-ln(u) * ml)`, `ml = 1 / ln(m)`.
fn sample_level(rng: &mut StdRng, ml: f32) -> usize {
    // `gen::<f32>()` is sampled from `[0, 1)`; flip to `(0, 1]` so `ln` never
    // sees zero.
    let u: f32 = 1.0 - rng.gen::<f32>();
    (-u.ln() * ml).floor() as usize
}

/// Assign every point a level and elect the entry point: the point with
/// the highest level, ties broken by the smaller id (earliest insertion).
fn assign_levels(n: usize, seed: u64, ml: f32) -> (Vec<usize>, EntryPoint) {
    let mut rng = StdRng::seed_from_u64(seed);
    let levels: Vec<usize> = (0..n).map(|_| sample_level(&mut rng, ml)).collect();

    let mut entry = EntryPoint {
        id: PointId(0),
        level: levels[0],
    };
    for (i, &level) in levels.iter().enumerate().skip(1) {
        if level > entry.level {
            entry = EntryPoint {
                id: PointId(i as u32),
                level,
            };
        }
    }
    (levels, entry)
}

/// Build a sealed graph over every point currently in `store`.
#[instrument(skip(store), fields(n_points = store.len()))]
pub fn build_graph(store: &dyn VectorSource, params: &BuildParams) -> Result<LiveGraph> {
    build_graph_inner(store, params, None)
}

/// Like [`build_graph`], but ticks `bar` once per node inserted. Takes the
/// bar as an explicit argument instead of a field threaded through
/// [`BuildParams`], since that struct stays `Copy` and
/// `indicatif::ProgressBar` isn't.
#[cfg(feature = "indicatif")]
pub fn build_graph_with_progress(
    store: &dyn VectorSource,
    params: &BuildParams,
    bar: &indicatif::ProgressBar,
) -> Result<LiveGraph> {
    bar.set_length(store.len() as u64);
    bar.set_message("building index");
    let result = build_graph_inner(store, params, Some(&|| bar.inc(1)));
    bar.finish();
    result
}

fn build_graph_inner(
    store: &dyn VectorSource,
    params: &BuildParams,
    progress: Option<&(dyn Fn() + Sync)>,
) -> Result<LiveGraph> {
    params.validate()?;

    let n = store.len();
    if n == 0 {
        return Ok(LiveGraph::new(&[]));
    }

    let ml = 1.0 / (params.m as f32).ln();
    let (levels, entry) = assign_levels(n, params.seed, ml);
    info!(m = params.m, m0 = params.m0, ef_construction = params.ef_construction,
          entry_id = entry.id.0, entry_level = entry.level, "starting build");

    let graph = LiveGraph::new(&levels);
    graph.set_entry_point(entry);

    let scratch = ScratchPool::new(n);
    let remaining: Vec<PointId> = (0..n)
        .map(|i| PointId(i as u32))
        .filter(|&id| id != entry.id)
        .collect();

    if params.n_threads <= 1 {
        // Deterministic path: plain sequential insertion in ascending id
        // order, required for byte-identical models at n_threads=1.
        for id in remaining {
            insert_node(id, &graph, store, &scratch, params);
            if let Some(tick) = progress {
                tick();
            }
        }
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.n_threads)
            .build()
            .map_err(|_| Error::OutOfMemory)?;
        pool.install(|| {
            remaining.into_par_iter().for_each(|id| {
                insert_node(id, &graph, store, &scratch, params);
                if let Some(tick) = progress {
                    tick();
                }
            });
        });
    }

    debug!("build finished");
    Ok(graph)
}

/// Insert a single new node `x`.
fn insert_node(
    x: PointId,
    graph: &LiveGraph,
    store: &dyn VectorSource,
    scratch: &ScratchPool,
    params: &BuildParams,
) {
    let mut search = scratch.acquire();
    let query = store.vector(x);
    let level_x = graph.level(x);
    let entry = graph.entry_point();

    search.reset();
    search.seed(entry.id, query, store);

    // (a) Greedy descent through the upper layers, one best candidate at a
    // time, down to the layer just above x's own top level.
    for level in (level_x + 1..=entry.level).rev() {
        search.search_layer(query, graph, store, level, 1);
        search.cull();
    }

    // (b)-(d) From min(Lx, L_entry) down to 0: beam search for candidates,
    // select x's neighbors, wire up reciprocal edges, re-prune overflowed
    // neighbors.
    let start_level = level_x.min(entry.level);
    for level in (0..=start_level).rev() {
        search.search_layer(query, graph, store, level, params.ef_construction);

        let target = if level == 0 { params.m0 } else { params.m };
        let selected = select_neighbors(search.results(), target, |a, b| {
            distance_between(store, a.pid, b.pid)
        });

        {
            let mut adjacency = graph.lock(x);
            adjacency[level] = selected.iter().map(|c| c.pid).collect();
        }

        for candidate in &selected {
            link_and_prune(graph, store, candidate.pid, x, candidate.distance.into_inner(), level, params);
        }

        if level > 0 {
            search.cull();
        }
    }

    // (e)-(f) x is now fully wired at every level; promoting the entry
    // point here is safe precisely because that wiring already happened.
    graph.maybe_promote_entry_point(x, level_x);

    scratch.release(search);
}

/// Add `x` to `y`'s level-`level` neighbor list, re-pruning with the
/// selection heuristic (centered on `y`) if the list overflows its cap.
fn link_and_prune(
    graph: &LiveGraph,
    store: &dyn VectorSource,
    y: PointId,
    x: PointId,
    distance_y_x: f32,
    level: usize,
    params: &BuildParams,
) {
    let cap = if level == 0 { params.m0 } else { params.m };
    let mut adjacency = graph.lock(y);
    adjacency[level].push(x);

    if adjacency[level].len() > cap {
        let candidates: Vec<Candidate> = adjacency[level]
            .iter()
            .map(|&pid| {
                let distance = if pid == x {
                    distance_y_x
                } else {
                    distance_between(store, y, pid)
                };
                Candidate {
                    distance: ordered_float::OrderedFloat(distance),
                    pid,
                }
            })
            .collect();

        let pruned = select_neighbors(&candidates, cap, |a, b| distance_between(store, a.pid, b.pid));
        adjacency[level] = pruned.into_iter().map(|c| c.pid).collect();
    }
}
