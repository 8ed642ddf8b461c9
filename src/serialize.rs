//! On-disk model format: a fixed header, a vector data block, a levels +
//! per-node-offset table, an adjacency block, and a trailing CRC32
//! checksum. Grounded on `herrbasan-nDB::segment`'s header/checksum/mmap
//! pattern.
//!
//! Layout (little-endian), mirroring the format this module must be
//! byte-compatible with:
//!
//! ```text
//! [0]   magic: [u8; 4]           "HNS1"
//! [4]   version: u32
//! [8]   metric: u32              0=L2, 1=Angular, 2=Dot
//! [12]  dim: u32
//! [16]  n_nodes: u64
//! [24]  m, m0, ef_construction: 3 x u32
//! [36]  max_level: u32
//! [40]  entry_id: u64
//! [48]  data_offset: u64
//! [56]  adj_offset: u64
//! [64]  level_offset: u64
//! [72]  padding to 128 bytes
//! data:    f32[n_nodes * dim]            (normalized form, if angular)
//! levels:  u32[n_nodes]                  top level per node
//! offsets: u64[n_nodes + 1]              per-node byte offset into adj block
//! adj:     for each node, for l in 0..=level: u32 count, u32[count] ids
//! trailer: u64 CRC32 of every byte from `data` through `adj`
//! ```
//!
//! The trailing checksum is an enrichment beyond the bare field table: it
//! is appended after the adjacency block rather than folded into the fixed
//! header, so the header's byte offsets stay exactly as specified.

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::graph::GraphReader;
use crate::point::VectorSource;
use crate::types::{EntryPoint, Metric, PointId};

pub const MAGIC: &[u8; 4] = b"HNS1";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 128;

#[derive(Debug, Clone, Copy)]
struct Header {
    metric: Metric,
    dim: u32,
    n_nodes: u64,
    m: u32,
    m0: u32,
    ef_construction: u32,
    max_level: u32,
    entry_id: u64,
    data_offset: u64,
    adj_offset: u64,
    level_offset: u64,
}

impl Header {
    fn to_bytes(self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            cursor.write_all(MAGIC).ok();
            cursor.write_u32::<LittleEndian>(FORMAT_VERSION).ok();
            cursor.write_u32::<LittleEndian>(self.metric.as_u32()).ok();
            cursor.write_u32::<LittleEndian>(self.dim).ok();
            cursor.write_u64::<LittleEndian>(self.n_nodes).ok();
            cursor.write_u32::<LittleEndian>(self.m).ok();
            cursor.write_u32::<LittleEndian>(self.m0).ok();
            cursor.write_u32::<LittleEndian>(self.ef_construction).ok();
            cursor.write_u32::<LittleEndian>(self.max_level).ok();
            cursor.write_u64::<LittleEndian>(self.entry_id).ok();
            cursor.write_u64::<LittleEndian>(self.data_offset).ok();
            cursor.write_u64::<LittleEndian>(self.adj_offset).ok();
            cursor.write_u64::<LittleEndian>(self.level_offset).ok();
        }
        Ok(buf)
    }

    fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::IncompatibleFormat {
                reason: format!("file shorter than the {HEADER_SIZE}-byte header"),
            });
        }
        let mut cursor = Cursor::new(bytes);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).map_err(Error::io(path))?;
        if &magic != MAGIC {
            return Err(Error::IncompatibleFormat {
                reason: "bad magic bytes".into(),
            });
        }
        let version = cursor.read_u32::<LittleEndian>().map_err(Error::io(path))?;
        if version != FORMAT_VERSION {
            return Err(Error::IncompatibleFormat {
                reason: format!("unsupported format version {version}"),
            });
        }
        let metric_raw = cursor.read_u32::<LittleEndian>().map_err(Error::io(path))?;
        let metric = Metric::from_u32(metric_raw).ok_or_else(|| Error::IncompatibleFormat {
            reason: format!("unknown metric discriminant {metric_raw}"),
        })?;
        let dim = cursor.read_u32::<LittleEndian>().map_err(Error::io(path))?;
        let n_nodes = cursor.read_u64::<LittleEndian>().map_err(Error::io(path))?;
        let m = cursor.read_u32::<LittleEndian>().map_err(Error::io(path))?;
        let m0 = cursor.read_u32::<LittleEndian>().map_err(Error::io(path))?;
        let ef_construction = cursor.read_u32::<LittleEndian>().map_err(Error::io(path))?;
        let max_level = cursor.read_u32::<LittleEndian>().map_err(Error::io(path))?;
        let entry_id = cursor.read_u64::<LittleEndian>().map_err(Error::io(path))?;
        let data_offset = cursor.read_u64::<LittleEndian>().map_err(Error::io(path))?;
        let adj_offset = cursor.read_u64::<LittleEndian>().map_err(Error::io(path))?;
        let level_offset = cursor.read_u64::<LittleEndian>().map_err(Error::io(path))?;
        Ok(Header {
            metric,
            dim,
            n_nodes,
            m,
            m0,
            ef_construction,
            max_level,
            entry_id,
            data_offset,
            adj_offset,
            level_offset,
        })
    }
}

/// Write `store`/`graph` to `path` in one pass, fsyncing before returning.
#[instrument(skip(store, graph), fields(n_nodes = store.len()))]
pub fn save(
    path: &Path,
    store: &dyn VectorSource,
    graph: &dyn GraphReader,
    m: usize,
    m0: usize,
    ef_construction: usize,
) -> Result<()> {
    let n = store.len();
    let dim = store.dim();
    let entry = graph.entry_point();

    let mut data_bytes = Vec::with_capacity(n * dim as usize * 4);
    for i in 0..n {
        for &v in store.vector(PointId(i as u32)) {
            data_bytes
                .write_f32::<LittleEndian>(v)
                .map_err(Error::io(path))?;
        }
    }

    let mut level_bytes = Vec::with_capacity(n * 4);
    let mut max_level = 0u32;
    for i in 0..n {
        let level = graph.level(PointId(i as u32)) as u32;
        max_level = max_level.max(level);
        level_bytes
            .write_u32::<LittleEndian>(level)
            .map_err(Error::io(path))?;
    }

    let adj_offset =
        HEADER_SIZE as u64 + data_bytes.len() as u64 + level_bytes.len() as u64 + (n as u64 + 1) * 8;

    let mut adj_bytes = Vec::new();
    let mut offsets = Vec::with_capacity(n + 1);
    for i in 0..n {
        offsets.push(adj_offset + adj_bytes.len() as u64);
        let id = PointId(i as u32);
        for level in 0..=graph.level(id) {
            let neighbors = graph.neighbors(id, level);
            adj_bytes
                .write_u32::<LittleEndian>(neighbors.len() as u32)
                .map_err(Error::io(path))?;
            for nb in neighbors {
                adj_bytes
                    .write_u32::<LittleEndian>(nb.0)
                    .map_err(Error::io(path))?;
            }
        }
    }
    offsets.push(adj_offset + adj_bytes.len() as u64);

    let mut offsets_bytes = Vec::with_capacity(offsets.len() * 8);
    for &o in &offsets {
        offsets_bytes
            .write_u64::<LittleEndian>(o)
            .map_err(Error::io(path))?;
    }

    let header = Header {
        metric: store.metric(),
        dim,
        n_nodes: n as u64,
        m: m as u32,
        m0: m0 as u32,
        ef_construction: ef_construction as u32,
        max_level,
        entry_id: entry.id.0 as u64,
        data_offset: HEADER_SIZE as u64,
        adj_offset,
        level_offset: HEADER_SIZE as u64 + data_bytes.len() as u64,
    };

    let mut body = Vec::with_capacity(
        data_bytes.len() + level_bytes.len() + offsets_bytes.len() + adj_bytes.len(),
    );
    body.extend_from_slice(&data_bytes);
    body.extend_from_slice(&level_bytes);
    body.extend_from_slice(&offsets_bytes);
    body.extend_from_slice(&adj_bytes);
    let checksum = crc32fast::hash(&body) as u64;

    let mut file = File::create(path).map_err(Error::io(path))?;
    file.write_all(&header.to_bytes()?).map_err(Error::io(path))?;
    file.write_all(&body).map_err(Error::io(path))?;
    file.write_u64::<LittleEndian>(checksum).map_err(Error::io(path))?;
    file.sync_all().map_err(Error::io(path))?;

    info!(n_nodes = n, bytes = HEADER_SIZE + body.len() + 8, "model saved");
    Ok(())
}

/// A sealed index's node store and graph, loaded from disk.
pub struct LoadedModel {
    pub store: Box<dyn VectorSource>,
    pub graph: Box<dyn GraphReader>,
    pub m: usize,
    pub m0: usize,
    pub ef_construction: usize,
}

/// Load a model previously written by [`save`].
///
/// `use_mmap = true` maps the file and returns zero-copy views over the
/// vector block; if the mapped region isn't 4-byte aligned at the vector
/// data offset (spec's documented edge case, practically never hit since
/// `mmap` returns page-aligned regions), this logs a warning and falls
/// back to the full-copy path rather than failing.
#[instrument(skip(path))]
pub fn load(dim: u32, metric: Metric, path: &Path, use_mmap: bool) -> Result<LoadedModel> {
    if use_mmap {
        match try_load_mmap(dim, metric, path)? {
            MmapOutcome::Ready(model) => return Ok(model),
            MmapOutcome::Misaligned => {
                warn!("mmap vector block is not 4-byte aligned; falling back to full-copy load");
            }
        }
    }
    load_full(dim, metric, path)
}

enum MmapOutcome {
    Ready(LoadedModel),
    Misaligned,
}

fn check_metric(got: Metric, expected: Metric) -> Result<()> {
    if got.as_u32() != expected.as_u32() {
        return Err(Error::IncompatibleFormat {
            reason: format!("metric mismatch: file has {got:?}, requested {expected:?}"),
        });
    }
    Ok(())
}

fn validate(bytes: &[u8], expected_dim: u32, path: &Path) -> Result<Header> {
    let header = Header::from_bytes(bytes, path)?;
    if header.dim != expected_dim {
        return Err(Error::DimensionMismatch {
            expected: expected_dim,
            got: header.dim as usize,
        });
    }
    if bytes.len() < 8 {
        return Err(Error::IncompatibleFormat {
            reason: "file has no checksum trailer".into(),
        });
    }
    let body = &bytes[HEADER_SIZE..bytes.len() - 8];
    let stored = (&bytes[bytes.len() - 8..])
        .read_u64::<LittleEndian>()
        .map_err(Error::io(path))?;
    let computed = crc32fast::hash(body) as u64;
    if computed != stored {
        return Err(Error::IncompatibleFormat {
            reason: "checksum mismatch".into(),
        });
    }
    Ok(header)
}

fn parse_levels(bytes: &[u8], header: &Header, path: &Path) -> Result<Vec<usize>> {
    let n = header.n_nodes as usize;
    let start = header.level_offset as usize;
    let end = start + n * 4;
    let mut cursor = Cursor::new(&bytes[start..end]);
    let mut levels = Vec::with_capacity(n);
    for _ in 0..n {
        levels.push(cursor.read_u32::<LittleEndian>().map_err(Error::io(path))? as usize);
    }
    Ok(levels)
}

fn parse_offsets(bytes: &[u8], header: &Header, path: &Path) -> Result<Vec<u64>> {
    let n = header.n_nodes as usize;
    let start = header.level_offset as usize + n * 4;
    let end = start + (n + 1) * 8;
    let mut cursor = Cursor::new(&bytes[start..end]);
    let mut offsets = Vec::with_capacity(n + 1);
    for _ in 0..=n {
        offsets.push(cursor.read_u64::<LittleEndian>().map_err(Error::io(path))?);
    }
    Ok(offsets)
}

fn parse_adjacency(
    bytes: &[u8],
    levels: &[usize],
    offsets: &[u64],
    path: &Path,
) -> Result<Vec<Vec<Vec<PointId>>>> {
    let mut result = Vec::with_capacity(levels.len());
    for (i, &level) in levels.iter().enumerate() {
        let start = offsets[i] as usize;
        let end = offsets[i + 1] as usize;
        let mut cursor = Cursor::new(&bytes[start..end]);
        let mut per_level = Vec::with_capacity(level + 1);
        for _ in 0..=level {
            let count = cursor.read_u32::<LittleEndian>().map_err(Error::io(path))?;
            let mut neighbors = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let id = cursor.read_u32::<LittleEndian>().map_err(Error::io(path))?;
                neighbors.push(PointId(id));
            }
            per_level.push(neighbors);
        }
        result.push(per_level);
    }
    Ok(result)
}

/// The graph half of a loaded model: adjacency is always eagerly parsed
/// into owned lists, for both full-copy and mmap loads. Unlike the vector
/// block, it's a small fraction of total file bytes, so paying one parse
/// pass buys simpler, alignment-independent code for the common case.
struct FlatGraph {
    levels: Vec<usize>,
    adjacency: Vec<Vec<Vec<PointId>>>,
    entry: EntryPoint,
}

impl GraphReader for FlatGraph {
    fn len(&self) -> usize {
        self.levels.len()
    }

    fn level(&self, id: PointId) -> usize {
        self.levels[id.index()]
    }

    fn neighbors(&self, id: PointId, level: usize) -> Vec<PointId> {
        self.adjacency[id.index()]
            .get(level)
            .cloned()
            .unwrap_or_default()
    }

    fn entry_point(&self) -> EntryPoint {
        self.entry
    }
}

struct OwnedStore {
    dim: u32,
    metric: Metric,
    n: usize,
    data: Vec<f32>,
}

impl VectorSource for OwnedStore {
    fn len(&self) -> usize {
        self.n
    }

    fn dim(&self) -> u32 {
        self.dim
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn vector(&self, id: PointId) -> &[f32] {
        let d = self.dim as usize;
        let start = id.index() * d;
        &self.data[start..start + d]
    }
}

/// Zero-copy vector store over a memory-mapped model file.
struct MmapStore {
    dim: u32,
    metric: Metric,
    n: usize,
    mmap: Arc<Mmap>,
    data_offset: usize,
}

impl VectorSource for MmapStore {
    fn len(&self) -> usize {
        self.n
    }

    fn dim(&self) -> u32 {
        self.dim
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn vector(&self, id: PointId) -> &[f32] {
        let d = self.dim as usize;
        let byte_start = self.data_offset + id.index() * d * 4;
        let bytes = &self.mmap[byte_start..byte_start + d * 4];
        // Alignment of `byte_start` was verified in `try_load_mmap` before
        // this store was constructed; the format is little-endian, which
        // matches every architecture this crate targets.
        unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const f32, d) }
    }
}

fn load_full(dim: u32, metric: Metric, path: &Path) -> Result<LoadedModel> {
    let mut file = File::open(path).map_err(Error::io(path))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(Error::io(path))?;

    let header = validate(&buf, dim, path)?;
    check_metric(header.metric, metric)?;

    let n = header.n_nodes as usize;
    let data_start = header.data_offset as usize;
    let data_end = data_start + n * dim as usize * 4;
    let mut cursor = Cursor::new(&buf[data_start..data_end]);
    let mut data = Vec::with_capacity(n * dim as usize);
    for _ in 0..(n * dim as usize) {
        data.push(cursor.read_f32::<LittleEndian>().map_err(Error::io(path))?);
    }

    let levels = parse_levels(&buf, &header, path)?;
    let offsets = parse_offsets(&buf, &header, path)?;
    let adjacency = parse_adjacency(&buf, &levels, &offsets, path)?;

    let store = OwnedStore {
        dim,
        metric: header.metric,
        n,
        data,
    };
    let graph = FlatGraph {
        levels,
        adjacency,
        entry: EntryPoint {
            id: PointId(header.entry_id as u32),
            level: header.max_level as usize,
        },
    };

    info!(n_nodes = n, "model loaded (full copy)");
    Ok(LoadedModel {
        store: Box::new(store),
        graph: Box::new(graph),
        m: header.m as usize,
        m0: header.m0 as usize,
        ef_construction: header.ef_construction as usize,
    })
}

fn try_load_mmap(dim: u32, metric: Metric, path: &Path) -> Result<MmapOutcome> {
    let file = File::open(path).map_err(Error::io(path))?;
    let mmap = unsafe { Mmap::map(&file) }.map_err(Error::io(path))?;

    let header = validate(&mmap, dim, path)?;
    check_metric(header.metric, metric)?;

    let base = mmap.as_ptr() as usize;
    if (base + header.data_offset as usize) % 4 != 0 {
        return Ok(MmapOutcome::Misaligned);
    }

    let n = header.n_nodes as usize;
    let levels = parse_levels(&mmap, &header, path)?;
    let offsets = parse_offsets(&mmap, &header, path)?;
    let adjacency = parse_adjacency(&mmap, &levels, &offsets, path)?;

    let mmap = Arc::new(mmap);
    let store = MmapStore {
        dim,
        metric: header.metric,
        n,
        mmap,
        data_offset: header.data_offset as usize,
    };
    let graph = FlatGraph {
        levels,
        adjacency,
        entry: EntryPoint {
            id: PointId(header.entry_id as u32),
            level: header.max_level as usize,
        },
    };

    info!(n_nodes = n, "model loaded (mmap)");
    Ok(MmapOutcome::Ready(LoadedModel {
        store: Box::new(store),
        graph: Box::new(graph),
        m: header.m as usize,
        m0: header.m0 as usize,
        ef_construction: header.ef_construction as usize,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_graph, BuildParams};
    use crate::point::PointStore;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn toy_store(n: usize, dim: usize, seed: u64) -> PointStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = PointStore::new(dim as u32, Metric::L2);
        for _ in 0..n {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>()).collect();
            store.push(v);
        }
        store
    }

    #[test]
    fn roundtrip_preserves_vectors_and_adjacency() {
        let store = toy_store(64, 8, 7);
        let params = BuildParams {
            m: 8,
            m0: 16,
            ef_construction: 32,
            seed: 1,
            n_threads: 1,
        };
        let graph = build_graph(&store, &params).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.hnsw");
        save(&path, &store, &graph, params.m, params.m0, params.ef_construction).unwrap();

        let loaded = load(8, Metric::L2, &path, false).unwrap();
        assert_eq!(loaded.store.len(), 64);
        assert_eq!(loaded.graph.len(), 64);
        for i in 0..64u32 {
            let id = PointId(i);
            assert_eq!(loaded.store.vector(id), store.vector(id));
            assert_eq!(loaded.graph.level(id), graph.level(id));
            for level in 0..=graph.level(id) {
                assert_eq!(loaded.graph.neighbors(id, level), graph.neighbors(id, level));
            }
        }
    }

    #[test]
    fn mmap_roundtrip_matches_full_copy() {
        let store = toy_store(40, 4, 3);
        let params = BuildParams {
            m: 6,
            m0: 12,
            ef_construction: 24,
            seed: 2,
            n_threads: 1,
        };
        let graph = build_graph(&store, &params).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.hnsw");
        save(&path, &store, &graph, params.m, params.m0, params.ef_construction).unwrap();

        let full = load(4, Metric::L2, &path, false).unwrap();
        let mapped = load(4, Metric::L2, &path, true).unwrap();
        for i in 0..40u32 {
            let id = PointId(i);
            assert_eq!(full.store.vector(id), mapped.store.vector(id));
        }
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let store = toy_store(4, 3, 5);
        let params = BuildParams {
            m: 4,
            m0: 8,
            ef_construction: 16,
            seed: 1,
            n_threads: 1,
        };
        let graph = build_graph(&store, &params).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.hnsw");
        save(&path, &store, &graph, params.m, params.m0, params.ef_construction).unwrap();

        let err = load(99, Metric::L2, &path, false).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 99, got: 3 }));
    }

    #[test]
    fn corrupted_trailer_fails_checksum() {
        let store = toy_store(4, 3, 5);
        let params = BuildParams {
            m: 4,
            m0: 8,
            ef_construction: 16,
            seed: 1,
            n_threads: 1,
        };
        let graph = build_graph(&store, &params).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.hnsw");
        save(&path, &store, &graph, params.m, params.m0, params.ef_construction).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let err = load(3, Metric::L2, &path, false).unwrap_err();
        assert!(matches!(err, Error::IncompatibleFormat { .. }));
    }
}
