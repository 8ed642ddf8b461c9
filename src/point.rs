//! The node store: owns every point's vector data.
//!
//! `PointStore` is append-only during ingestion. For angular indexes, both
//! the original vector (returned from [`PointStore::original`]) and a unit
//! length-normalized copy (used for every distance computation, per spec
//! §4.1) are retained.

use crate::distance::normalize;
use crate::types::{Metric, PointId};

pub struct Point {
    original: Vec<f32>,
    /// Only populated (and distinct from `original`) for `Metric::Angular`.
    normalized: Vec<f32>,
}

impl Point {
    /// The vector used for all distance computations.
    pub fn query_form(&self) -> &[f32] {
        &self.normalized
    }

    /// The vector as originally supplied to `add_data`.
    pub fn original(&self) -> &[f32] {
        &self.original
    }
}

/// A source of query-ready vectors, implemented both by the owned
/// [`PointStore`] (used during ingestion/build and for full-copy loads) and
/// by the mmap-backed store in [`crate::serialize`] (used for zero-copy
/// loads). The search engine and builder are generic over this trait so
/// neither cares which backend it's reading from.
pub trait VectorSource: Send + Sync {
    fn len(&self) -> usize;
    fn dim(&self) -> u32;
    fn metric(&self) -> Metric;
    /// The vector used for distance computation (normalized, for angular).
    fn vector(&self, id: PointId) -> &[f32];
}

pub fn distance_between(src: &dyn VectorSource, a: PointId, b: PointId) -> f32 {
    src.metric().distance(src.vector(a), src.vector(b))
}

pub fn distance_to_query(src: &dyn VectorSource, query: &[f32], other: PointId) -> f32 {
    src.metric().distance(query, src.vector(other))
}

/// Append-only storage for ingested points, keyed by insertion order.
pub struct PointStore {
    dim: u32,
    metric: Metric,
    points: Vec<Point>,
}

impl PointStore {
    pub fn new(dim: u32, metric: Metric) -> Self {
        Self {
            dim,
            metric,
            points: Vec::new(),
        }
    }

    pub fn dim(&self) -> u32 {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append `v` and return its newly assigned id.
    ///
    /// Callers must validate `v.len() == self.dim` and index state before
    /// calling; this type has no notion of "sealed" (that lives in
    /// [`crate::index::HnswIndex`]).
    pub fn push(&mut self, v: Vec<f32>) -> PointId {
        let id = PointId(self.points.len() as u32);
        let normalized = if self.metric.normalizes() {
            let mut n = v.clone();
            normalize(&mut n);
            n
        } else {
            // Non-angular metrics compare against the raw vector directly;
            // storing it twice keeps `query_form` uniform across metrics
            // without an enum match on every distance call.
            v.clone()
        };
        self.points.push(Point {
            original: v,
            normalized,
        });
        id
    }

    pub fn get(&self, id: PointId) -> &Point {
        &self.points[id.index()]
    }

    pub fn distance(&self, a: PointId, b: PointId) -> f32 {
        self.metric
            .distance(self.get(a).query_form(), self.get(b).query_form())
    }

    pub fn distance_to_query(&self, query: &[f32], other: PointId) -> f32 {
        self.metric.distance(query, self.get(other).query_form())
    }

    pub fn iter(&self) -> impl Iterator<Item = (PointId, &Point)> {
        self.points
            .iter()
            .enumerate()
            .map(|(i, p)| (PointId(i as u32), p))
    }
}

impl VectorSource for PointStore {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn dim(&self) -> u32 {
        self.dim
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn vector(&self, id: PointId) -> &[f32] {
        self.get(id).query_form()
    }
}
