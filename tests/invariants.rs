//! Structural invariants checked against small random builds: neighbor-list
//! symmetry, per-level degree bounds, the k-bound on query results, and
//! self-inclusion in id-based queries.

use std::collections::HashSet;

use proptest::collection::vec as pvec;
use proptest::prelude::*;

use hnswann::{HnswBuilder, HnswIndex, Metric, PointId};

fn small_vector() -> impl Strategy<Value = Vec<f32>> {
    pvec(-10.0f32..10.0, 6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// `search_by_vector` returns exactly `min(k, |index|)` distinct ids.
    #[test]
    fn k_bound_holds(points in pvec(small_vector(), 5..60), k in 1usize..20) {
        let mut index = HnswIndex::new(6, Metric::L2);
        for p in &points {
            index.add_data(p.clone()).unwrap();
        }
        index.build(HnswBuilder::default().m(8).m0(16).ef_construction(32)).unwrap();

        let out = index.search_by_vector(&points[0], k, None, false).unwrap();
        let expected = k.min(points.len());
        prop_assert_eq!(out.len(), expected);

        let ids: HashSet<PointId> = out.ids().into_iter().collect();
        prop_assert_eq!(ids.len(), expected, "ids returned must be distinct");
    }

    /// `search_by_id` always returns the queried id first, at distance zero.
    #[test]
    fn search_by_id_always_returns_self_first(points in pvec(small_vector(), 5..60)) {
        let mut index = HnswIndex::new(6, Metric::L2);
        for p in &points {
            index.add_data(p.clone()).unwrap();
        }
        index.build(HnswBuilder::default().m(8).m0(16).ef_construction(32)).unwrap();

        for i in 0..points.len() as u32 {
            let out = index.search_by_id(PointId(i), 5, None, false).unwrap();
            prop_assert_eq!(out.ids()[0], PointId(i));
        }
    }
}

/// Full adjacency-list symmetry and degree-cap checks need direct access to
/// the built graph's adjacency, which the public façade doesn't expose, so
/// those live as unit tests next to `LiveGraph` instead. A fixed,
/// hand-checkable dataset is used here rather than `proptest` shrinking.
#[test]
fn tiny_build_is_internally_consistent() {
    // Exercised end-to-end through the public API only: every point finds
    // itself via its own vector, and every k-NN query returns results
    // sorted nearest-first with no duplicate ids -- the externally
    // observable half of those checks (full adjacency-list symmetry and
    // degree caps are unit-tested directly against `LiveGraph` in
    // `src/builder.rs` and `src/graph.rs`, which have access to the
    // private graph representation).
    let mut index = HnswIndex::new(2, Metric::L2);
    let points = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [5.0, 5.0], [5.0, 6.0]];
    for p in points {
        index.add_data(p.to_vec()).unwrap();
    }
    index.build(HnswBuilder::default().m(4).m0(8).ef_construction(16)).unwrap();

    for i in 0..points.len() as u32 {
        let out = index
            .search_by_vector(&points[i as usize], points.len(), None, true)
            .unwrap();
        let hnswann::SearchOutput::WithDistances(results) = out else {
            unreachable!()
        };
        assert_eq!(results[0].id, PointId(i));
        assert!(results[0].distance.abs() < 1e-5);
        for w in results.windows(2) {
            assert!(w[0].distance <= w[1].distance);
        }
        let ids: HashSet<PointId> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), results.len());
    }
}
