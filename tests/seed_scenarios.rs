//! The worked examples carried end-to-end: tiny L2, tiny angular, and
//! self-query scenarios with known-by-hand expected orderings.

use hnswann::{HnswBuilder, HnswIndex, Metric, PointId};

fn ids(out: &hnswann::SearchOutput) -> Vec<u32> {
    out.ids().into_iter().map(|id| id.0).collect()
}

#[test]
fn tiny_l2() {
    let mut index = HnswIndex::new(2, Metric::L2);
    index.add_data(vec![2.0, 2.0]).unwrap();
    index.add_data(vec![3.0, 2.0]).unwrap();
    index.add_data(vec![3.0, 3.0]).unwrap();
    index.build(HnswBuilder::default()).unwrap();

    let out = index.search_by_vector(&[4.0, 4.0], 3, None, false).unwrap();
    assert_eq!(ids(&out), vec![2, 1, 0]);

    let out = index.search_by_vector(&[1.0, 1.0], 3, None, false).unwrap();
    assert_eq!(ids(&out), vec![0, 1, 2]);
}

#[test]
fn tiny_angular() {
    let mut index = HnswIndex::new(3, Metric::Angular);
    index.add_data(vec![0.0, 0.0, 1.0]).unwrap();
    index.add_data(vec![0.0, 1.0, 0.0]).unwrap();
    index.add_data(vec![1.0, 0.0, 0.0]).unwrap();
    index
        .build(HnswBuilder::default().m(5).m0(10))
        .unwrap();

    let out = index
        .search_by_vector(&[3.0, 2.0, 1.0], 3, None, false)
        .unwrap();
    assert_eq!(ids(&out), vec![0, 1, 2]);

    let out = index
        .search_by_vector(&[1.0, 2.0, 3.0], 3, None, false)
        .unwrap();
    assert_eq!(ids(&out), vec![0, 1, 2]);
}

/// `search_by_id` includes the queried point itself, at distance zero and
/// first in the ordering.
#[test]
fn self_query_includes_the_queried_point() {
    let mut index = HnswIndex::new(2, Metric::L2);
    index.add_data(vec![2.0, 2.0]).unwrap();
    index.add_data(vec![3.0, 2.0]).unwrap();
    index.add_data(vec![3.0, 3.0]).unwrap();
    index.build(HnswBuilder::default()).unwrap();

    let out = index.search_by_id(PointId(0), 3, None, false).unwrap();
    assert_eq!(ids(&out), vec![0, 1, 2]);

    let out = index.search_by_id(PointId(2), 3, None, false).unwrap();
    assert_eq!(ids(&out), vec![2, 1, 0]);
}

#[test]
fn load_with_mismatched_dim_leaves_no_side_effects() {
    let mut index = HnswIndex::new(100, Metric::L2);
    for i in 0..5u32 {
        index.add_data(vec![i as f32; 100]).unwrap();
    }
    index.build(HnswBuilder::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.hnsw");
    index.save(&path).unwrap();

    let err = HnswIndex::load(30, Metric::L2, &path, false).unwrap_err();
    assert!(matches!(
        err,
        hnswann::Error::DimensionMismatch {
            expected: 30,
            got: 100
        }
    ));
}
