//! Distance kernels for dense `f32` vectors.
//!
//! `smaller == more similar` for every metric here, which lets the search
//! engine treat distance as a single min-heap key regardless of which
//! metric the index was built with:
//!
//! - [`Metric::L2`]: squared Euclidean distance (no `sqrt` — order-preserving
//!   and cheaper).
//! - [`Metric::Angular`]: `1 - dot(a, b)` on unit-normalized inputs.
//! - [`Metric::Dot`]: `-dot(a, b)`.
//!
//! The accumulation loop is vectorized with `wide`'s portable SIMD lanes;
//! remainder elements that don't fill a full lane are summed with scalar
//! code. Determinism is only guaranteed for equal inputs within one run, not
//! bit-for-bit across architectures.

use wide::f32x8;

pub use crate::types::Metric;

const LANES: usize = 8;

impl Metric {
    /// Compute the distance between two equal-length vectors.
    ///
    /// Callers are responsible for sanitizing `NaN`/`Inf` inputs; this
    /// function never errors and will silently propagate non-finite values
    /// into its output.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Metric::L2 => squared_l2(a, b),
            Metric::Angular => 1.0 - dot(a, b),
            Metric::Dot => -dot(a, b),
        }
    }
}

/// Sum of per-lane products, accumulated in SIMD lanes of 8.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / LANES;
    let mut acc = f32x8::ZERO;
    for i in 0..chunks {
        let start = i * LANES;
        let va = f32x8::from(&a[start..start + LANES]);
        let vb = f32x8::from(&b[start..start + LANES]);
        acc = acc + (va * vb);
    }
    let mut total: f32 = acc.to_array().iter().sum();
    for i in (chunks * LANES)..a.len() {
        total += a[i] * b[i];
    }
    total
}

/// Sum of squared per-lane differences, accumulated in SIMD lanes of 8.
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / LANES;
    let mut acc = f32x8::ZERO;
    for i in 0..chunks {
        let start = i * LANES;
        let va = f32x8::from(&a[start..start + LANES]);
        let vb = f32x8::from(&b[start..start + LANES]);
        let diff = va - vb;
        acc = acc + (diff * diff);
    }
    let mut total: f32 = acc.to_array().iter().sum();
    for i in (chunks * LANES)..a.len() {
        let diff = a[i] - b[i];
        total += diff * diff;
    }
    total
}

/// Normalize `v` to unit length in place.
///
/// A zero vector is left untouched rather than divided into `NaN`: this is
/// internal housekeeping at ingest time, not caller-supplied query data, so
/// the "NaN propagates silently" rule from §4.1 doesn't apply here.
pub(crate) fn normalize(v: &mut [f32]) {
    let norm = dot(v, v).sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
