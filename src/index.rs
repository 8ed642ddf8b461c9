//! The public façade: the Empty → Ingesting → Sealed state machine.
//! Collapses a separate index-only/index-plus-values split into one type,
//! since this crate has no generic value payload to carry.

use std::path::Path;

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::instrument;

use crate::builder::{build_graph, BuildParams};
use crate::error::{Error, Result};
use crate::graph::GraphReader;
use crate::point::{PointStore, VectorSource};
use crate::search::{run_query, ScratchPool};
use crate::serialize;
use crate::types::{Candidate, Metric, PointId, SearchOutput, SearchResult};

/// Tunable parameters for [`HnswIndex::build`], in a self-consuming
/// builder style.
///
/// Defaults follow the stated baseline (`M=16`, `M0=2*M`); see
/// `DESIGN.md` for why these were chosen over other historical defaults,
/// which the retained reference sources don't actually agree on.
#[derive(Clone, Debug)]
pub struct HnswBuilder {
    m: usize,
    m0: usize,
    ef_construction: usize,
    ef_search: usize,
    seed: u64,
    n_threads: usize,
    #[cfg(feature = "indicatif")]
    progress: Option<indicatif::ProgressBar>,
}

impl Default for HnswBuilder {
    fn default() -> Self {
        Self {
            m: 16,
            m0: 32,
            ef_construction: 200,
            ef_search: 100,
            seed: 0x5EED,
            n_threads: num_cpus::get(),
            #[cfg(feature = "indicatif")]
            progress: None,
        }
    }
}

impl HnswBuilder {
    pub fn m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn m0(mut self, m0: usize) -> Self {
        self.m0 = m0;
        self
    }

    pub fn ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn ef_search(mut self, ef_search: usize) -> Self {
        self.ef_search = ef_search;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn n_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads.max(1);
        self
    }

    /// A `ProgressBar` ticked once per point inserted during `build`.
    #[cfg(feature = "indicatif")]
    pub fn progress(mut self, bar: indicatif::ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }
}

struct Sealed {
    store: Box<dyn VectorSource>,
    graph: Box<dyn GraphReader>,
    scratch: ScratchPool,
    ef_search: usize,
    m: usize,
    m0: usize,
    ef_construction: usize,
}

enum State {
    Empty,
    Ingesting(PointStore),
    Sealed(Sealed),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Empty => "empty",
            State::Ingesting(_) => "ingesting",
            State::Sealed(_) => "sealed",
        }
    }
}

/// A fixed-dimension, single-metric approximate nearest-neighbor index.
///
/// Moves through exactly three states: [`State::Empty`] (just constructed),
/// [`State::Ingesting`] (after the first `add_data`), and [`State::Sealed`]
/// (after `build` or `load`). See the module docs for the full transition
/// table; every method below enforces it by returning
/// [`Error::InvalidState`] rather than silently no-opping.
pub struct HnswIndex {
    dim: u32,
    metric: Metric,
    state: State,
}

impl HnswIndex {
    pub fn new(dim: u32, metric: Metric) -> Self {
        Self {
            dim,
            metric,
            state: State::Empty,
        }
    }

    pub fn dim(&self) -> u32 {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        match &self.state {
            State::Empty => 0,
            State::Ingesting(store) => store.len(),
            State::Sealed(sealed) => sealed.store.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self.state, State::Sealed(_))
    }

    fn check_dim(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.dim as usize {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                got: v.len(),
            });
        }
        Ok(())
    }

    fn sealed(&self, action: &'static str) -> Result<&Sealed> {
        match &self.state {
            State::Sealed(sealed) => Ok(sealed),
            other => Err(Error::invalid_state(action, other.name())),
        }
    }

    /// Append one vector, returning its newly assigned id.
    ///
    /// Valid from [`State::Empty`] (which transitions to `Ingesting`) and
    /// from `Ingesting`; fails with `InvalidState` once sealed.
    pub fn add_data(&mut self, v: Vec<f32>) -> Result<PointId> {
        self.check_dim(&v)?;
        match &mut self.state {
            State::Empty => {
                let mut store = PointStore::new(self.dim, self.metric);
                let id = store.push(v);
                self.state = State::Ingesting(store);
                Ok(id)
            }
            State::Ingesting(store) => Ok(store.push(v)),
            State::Sealed(_) => Err(Error::invalid_state("add_data", "sealed")),
        }
    }

    /// Run the one-shot multi-threaded build, sealing the index.
    ///
    /// Only valid from `Ingesting`. Argument errors (e.g. `m == 0`) are
    /// checked before any state is touched, so the index is left untouched
    /// on that path; an `OutOfMemory` failure during the build itself
    /// discards the ingested points and leaves the index `Empty` again,
    /// discards it without touching the index.
    #[instrument(skip(self, config))]
    pub fn build(&mut self, config: HnswBuilder) -> Result<()> {
        let params = BuildParams {
            m: config.m,
            m0: config.m0,
            ef_construction: config.ef_construction,
            seed: config.seed,
            n_threads: config.n_threads.max(1),
        };
        params.validate()?;

        if !matches!(self.state, State::Ingesting(_)) {
            return Err(Error::invalid_state("build", self.state.name()));
        }

        let store = match std::mem::replace(&mut self.state, State::Empty) {
            State::Ingesting(store) => store,
            _ => unreachable!("checked above"),
        };

        #[cfg(feature = "indicatif")]
        let graph = match &config.progress {
            Some(bar) => crate::builder::build_graph_with_progress(&store, &params, bar)?,
            None => build_graph(&store, &params)?,
        };
        #[cfg(not(feature = "indicatif"))]
        let graph = build_graph(&store, &params)?;
        let n = store.len();
        self.state = State::Sealed(Sealed {
            store: Box::new(store),
            graph: Box::new(graph),
            scratch: ScratchPool::new(n.max(1)),
            ef_search: config.ef_search,
            m: config.m,
            m0: config.m0,
            ef_construction: config.ef_construction,
        });
        Ok(())
    }

    /// Write the sealed model to `path`. Only valid once sealed.
    pub fn save(&self, path: &Path) -> Result<()> {
        let sealed = self.sealed("save")?;
        serialize::save(
            path,
            sealed.store.as_ref(),
            sealed.graph.as_ref(),
            sealed.m,
            sealed.m0,
            sealed.ef_construction,
        )
    }

    /// Load a model previously written by [`HnswIndex::save`], already
    /// sealed.
    pub fn load(dim: u32, metric: Metric, path: &Path, use_mmap: bool) -> Result<Self> {
        let loaded = serialize::load(dim, metric, path, use_mmap)?;
        let n = loaded.store.len();
        Ok(Self {
            dim,
            metric,
            state: State::Sealed(Sealed {
                store: loaded.store,
                graph: loaded.graph,
                scratch: ScratchPool::new(n.max(1)),
                ef_search: HnswBuilder::default().ef_search,
                m: loaded.m,
                m0: loaded.m0,
                ef_construction: loaded.ef_construction,
            }),
        })
    }

    fn resolve_ef(sealed: &Sealed, k: usize, ef: Option<usize>) -> Result<usize> {
        if k == 0 {
            return Err(Error::invalid_arg("k", "must be greater than zero"));
        }
        let ef = ef.unwrap_or_else(|| k.max(sealed.ef_search));
        if ef < k {
            return Err(Error::invalid_arg("ef", "must be >= k"));
        }
        Ok(ef)
    }

    fn assemble(results: Vec<Candidate>, k: usize, include_distances: bool) -> SearchOutput {
        let iter = results.into_iter().take(k);
        if include_distances {
            SearchOutput::WithDistances(
                iter.map(|c| SearchResult {
                    id: c.pid,
                    distance: c.distance.into_inner(),
                })
                .collect(),
            )
        } else {
            SearchOutput::Ids(iter.map(|c| c.pid).collect())
        }
    }

    /// Find the `k` nearest points to `v`.
    pub fn search_by_vector(
        &self,
        v: &[f32],
        k: usize,
        ef: Option<usize>,
        include_distances: bool,
    ) -> Result<SearchOutput> {
        let sealed = self.sealed("search")?;
        self.check_dim(v)?;
        let ef = Self::resolve_ef(sealed, k, ef)?;

        let mut search = sealed.scratch.acquire();
        let results = run_query(v, ef, sealed.graph.as_ref(), sealed.store.as_ref(), &mut search);
        sealed.scratch.release(search);

        Ok(Self::assemble(results, k, include_distances))
    }

    /// Find the `k` nearest points to an already-indexed point. `id` itself
    /// is always the nearest result, at distance zero.
    pub fn search_by_id(
        &self,
        id: PointId,
        k: usize,
        ef: Option<usize>,
        include_distances: bool,
    ) -> Result<SearchOutput> {
        let sealed = self.sealed("search")?;
        if id.index() >= sealed.store.len() {
            return Err(Error::invalid_arg("id", "out of range"));
        }
        let ef = Self::resolve_ef(sealed, k, ef)?;

        let query = sealed.store.vector(id).to_vec();
        let mut search = sealed.scratch.acquire();
        let results = run_query(
            &query,
            ef,
            sealed.graph.as_ref(),
            sealed.store.as_ref(),
            &mut search,
        );
        sealed.scratch.release(search);

        Ok(Self::assemble(results, k, include_distances))
    }

    /// Run `vs.len()` independent queries across a `rayon` thread pool.
    pub fn batch_search(
        &self,
        vs: &[Vec<f32>],
        k: usize,
        ef: Option<usize>,
        n_threads: usize,
        include_distances: bool,
    ) -> Result<Vec<SearchOutput>> {
        let sealed = self.sealed("search")?;
        for v in vs {
            self.check_dim(v)?;
        }
        let ef = Self::resolve_ef(sealed, k, ef)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads.max(1))
            .build()
            .map_err(|_| Error::OutOfMemory)?;

        let outputs = pool.install(|| {
            vs.par_iter()
                .map(|v| {
                    let mut search = sealed.scratch.acquire();
                    let results =
                        run_query(v, ef, sealed.graph.as_ref(), sealed.store.as_ref(), &mut search);
                    sealed.scratch.release(search);
                    Self::assemble(results, k, include_distances)
                })
                .collect()
        });
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_l2() -> HnswIndex {
        let mut index = HnswIndex::new(2, Metric::L2);
        index.add_data(vec![2.0, 2.0]).unwrap();
        index.add_data(vec![3.0, 2.0]).unwrap();
        index.add_data(vec![3.0, 3.0]).unwrap();
        index
            .build(HnswBuilder::default().m(5).m0(10).ef_construction(20))
            .unwrap();
        index
    }

    #[test]
    fn tiny_l2_nearest_neighbor_order() {
        let index = tiny_l2();
        let out = index
            .search_by_vector(&[4.0, 4.0], 3, None, false)
            .unwrap();
        assert_eq!(out.ids(), vec![PointId(2), PointId(1), PointId(0)]);

        let out = index
            .search_by_vector(&[1.0, 1.0], 3, None, false)
            .unwrap();
        assert_eq!(out.ids(), vec![PointId(0), PointId(1), PointId(2)]);
    }

    #[test]
    fn tiny_angular_nearest_neighbor_order() {
        let mut index = HnswIndex::new(3, Metric::Angular);
        index.add_data(vec![0.0, 0.0, 1.0]).unwrap();
        index.add_data(vec![0.0, 1.0, 0.0]).unwrap();
        index.add_data(vec![1.0, 0.0, 0.0]).unwrap();
        index
            .build(HnswBuilder::default().m(5).m0(10).ef_construction(20))
            .unwrap();

        let out = index
            .search_by_vector(&[3.0, 2.0, 1.0], 3, None, false)
            .unwrap();
        assert_eq!(out.ids(), vec![PointId(0), PointId(1), PointId(2)]);
    }

    #[test]
    fn search_by_id_includes_self_at_distance_zero() {
        let index = tiny_l2();
        let out = index.search_by_id(PointId(0), 3, None, false).unwrap();
        assert_eq!(out.ids(), vec![PointId(0), PointId(1), PointId(2)]);

        let out = index.search_by_id(PointId(2), 3, None, false).unwrap();
        assert_eq!(out.ids(), vec![PointId(2), PointId(1), PointId(0)]);
    }

    #[test]
    fn save_then_load_matches_original_queries() {
        let index = tiny_l2();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.hnsw");
        index.save(&path).unwrap();

        let loaded = HnswIndex::load(2, Metric::L2, &path, false).unwrap();
        let a = index.search_by_vector(&[4.0, 4.0], 3, None, false).unwrap();
        let b = loaded
            .search_by_vector(&[4.0, 4.0], 3, None, false)
            .unwrap();
        assert_eq!(a.ids(), b.ids());
    }

    #[test]
    fn load_with_wrong_dim_fails_and_has_no_side_effects() {
        let index = tiny_l2();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.hnsw");
        index.save(&path).unwrap();

        let err = HnswIndex::load(99, Metric::L2, &path, false).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 99,
                got: 2
            }
        ));
    }

    #[test]
    fn add_data_after_build_is_rejected() {
        let mut index = tiny_l2();
        let err = index.add_data(vec![0.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn search_on_empty_index_is_rejected() {
        let index = HnswIndex::new(2, Metric::L2);
        let err = index
            .search_by_vector(&[0.0, 0.0], 1, None, false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn k_larger_than_index_returns_everything() {
        let index = tiny_l2();
        let out = index
            .search_by_vector(&[0.0, 0.0], 100, None, false)
            .unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn ef_below_k_is_an_invalid_argument() {
        let index = tiny_l2();
        let err = index
            .search_by_vector(&[0.0, 0.0], 5, Some(2), false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}
