//! Shared small types used across the index: point identifiers, distance
//! metrics, and the candidate/result structs threaded through search.

use ordered_float::OrderedFloat;

/// A dense, 0-based point identifier, assigned in insertion order.
///
/// Stored as `u32` (not `usize`) since it is the unit the on-disk adjacency
/// format and every in-memory neighbor list are built from; this keeps the
/// serialized layout and the live graph byte-compatible.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PointId(pub u32);

impl PointId {
    pub(crate) const INVALID: PointId = PointId(u32::MAX);

    #[inline]
    pub(crate) fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for PointId {
    fn from(id: u32) -> Self {
        PointId(id)
    }
}

impl From<PointId> for u64 {
    fn from(id: PointId) -> Self {
        id.0 as u64
    }
}

/// The distance metric an index is built and queried with.
///
/// Persisted in the file header as a `u32` discriminant (§4.7 of the
/// design doc); the numeric values below are part of the on-disk format and
/// must never be renumbered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Metric {
    L2 = 0,
    Angular = 1,
    Dot = 2,
}

impl Metric {
    pub(crate) fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Metric::L2),
            1 => Some(Metric::Angular),
            2 => Some(Metric::Dot),
            _ => None,
        }
    }

    pub(crate) fn as_u32(self) -> u32 {
        self as u32
    }

    /// Whether this metric requires a unit-normalized copy of each vector.
    pub(crate) fn normalizes(self) -> bool {
        matches!(self, Metric::Angular)
    }
}

/// A candidate point under consideration during a search, ordered by
/// distance ascending with smaller `id` breaking ties (closer or
/// lower-numbered candidates sort first).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub distance: OrderedFloat<f32>,
    pub pid: PointId,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.pid.cmp(&other.pid))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The current entry point of the graph: the node with the highest
/// assigned level, ties broken by earliest insertion.
#[derive(Clone, Copy, Debug)]
pub struct EntryPoint {
    pub id: PointId,
    pub level: usize,
}

/// One result row from a query, optionally carrying the distance to the
/// query vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchResult {
    pub id: PointId,
    pub distance: f32,
}

/// The two shapes a query can return, selected by the caller's
/// `include_distances` flag.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchOutput {
    Ids(Vec<PointId>),
    WithDistances(Vec<SearchResult>),
}

impl SearchOutput {
    pub fn len(&self) -> usize {
        match self {
            SearchOutput::Ids(v) => v.len(),
            SearchOutput::WithDistances(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids in result order, regardless of which variant this is.
    pub fn ids(&self) -> Vec<PointId> {
        match self {
            SearchOutput::Ids(v) => v.clone(),
            SearchOutput::WithDistances(v) => v.iter().map(|r| r.id).collect(),
        }
    }
}
