//! `hnswann`: a multi-threaded Hierarchical Navigable Small World (HNSW)
//! approximate nearest-neighbor index over dense `f32` vectors.
//!
//! Three lifecycle phases, enforced by [`HnswIndex`]'s internal state
//! machine: incremental ingestion via [`HnswIndex::add_data`], a one-shot
//! multi-threaded [`HnswIndex::build`], and any number of concurrent
//! read-only queries, optionally served from a memory-mapped
//! [`HnswIndex::load`]ed file.
//!
//! This crate does not install a `tracing` subscriber; embedders that want
//! the build/save/load spans and events wire one up themselves (e.g.
//! `tracing_subscriber::fmt::init()`).
//!
//! ```no_run
//! use hnswann::{HnswBuilder, HnswIndex, Metric};
//!
//! let mut index = HnswIndex::new(2, Metric::L2);
//! index.add_data(vec![2.0, 2.0]).unwrap();
//! index.add_data(vec![3.0, 2.0]).unwrap();
//! index.add_data(vec![3.0, 3.0]).unwrap();
//! index.build(HnswBuilder::default()).unwrap();
//!
//! let nearest = index.search_by_vector(&[4.0, 4.0], 2, None, false).unwrap();
//! assert_eq!(nearest.len(), 2);
//! ```

mod builder;
mod distance;
mod error;
mod graph;
mod heuristic;
mod index;
mod point;
mod search;
mod serialize;
mod types;
mod visited;

pub use error::{Error, Result};
pub use index::{HnswBuilder, HnswIndex};
pub use point::VectorSource;
pub use types::{Metric, PointId, SearchOutput, SearchResult};
