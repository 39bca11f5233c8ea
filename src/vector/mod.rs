// Copyright (c) 2025 EmberDB Contributors
// Licensed under the EmberDB License. See LICENSE file for details.

//! Vector index manager: per-collection ANN indexes.
//!
//! An [`AnnIndex`] is built from an opaque recipe string by
//! [`index_factory`], mirroring the factory interface of the big ANN
//! libraries:
//!
//! - `"Flat"` - exact brute-force search
//! - `"IVF<n>,Flat"` - inverted-file index with `n` coarse cells; requires a
//!   [`AnnIndex::train`] call before vectors can be added
//!
//! Labels are assigned by insertion order: the i-th vector ever added gets
//! label `i`, so the label of the most recent vector is `ntotal - 1`.
//! Deletions are not supported, which keeps labels dense and monotonic.
//!
//! # Metric conventions
//!
//! [`Metric::L2`] reports *squared* Euclidean distances in ascending order
//! (the convention of the underlying-library lineage this module preserves).
//! [`Metric::InnerProduct`] reports raw dot products in descending order:
//! larger is more similar.
//!
//! # Example
//!
//! ```rust
//! use emberdb::vector::{index_factory, Metric};
//!
//! let mut index = index_factory(4, "Flat", Metric::L2).unwrap();
//! index.add(&[0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0], 2).unwrap();
//! assert_eq!(index.ntotal(), 2);
//!
//! let (distances, labels) = index.search(&[0.0, 0.0, 0.0, 0.9], 1, 1).unwrap();
//! assert_eq!(labels[0], 0);
//! assert!(distances[0] < 0.1);
//! ```

mod flat;
mod ivf;
mod persist;

use serde::{Deserialize, Serialize};

use crate::error::{EmberError, Result};
use flat::FlatIndex;
use ivf::IvfIndex;
pub use persist::read_index;

/// Similarity metric of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Squared Euclidean distance; lower is more similar.
    L2,
    /// Dot product; higher is more similar.
    InnerProduct,
}

impl Metric {
    pub(crate) fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => l2_sqr_distance(a, b),
            Metric::InnerProduct => dot(a, b),
        }
    }

    /// Fill value for result slots with no candidate.
    pub(crate) fn empty_slot(&self) -> f32 {
        match self {
            Metric::L2 => f32::INFINITY,
            Metric::InnerProduct => f32::NEG_INFINITY,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Backend {
    Flat(FlatIndex),
    Ivf(IvfIndex),
}

/// An ANN index over vectors of one fixed dimension.
///
/// Constructed by [`index_factory`] or loaded with [`read_index`]. The index
/// lives in memory; [`AnnIndex::write_to_file`] serializes the full state to
/// a sidecar file.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnnIndex {
    dim: usize,
    metric: Metric,
    description: String,
    backend: Backend,
}

/// Builds a new in-memory index from a recipe string.
///
/// Unknown recipes are rejected with a vector error; a zero dimension is an
/// invalid argument.
pub fn index_factory(dim: usize, description: &str, metric: Metric) -> Result<AnnIndex> {
    if dim == 0 {
        return Err(EmberError::InvalidArgument(
            "index dimension cannot be zero".into(),
        ));
    }
    let backend = if description == "Flat" {
        Backend::Flat(FlatIndex::new())
    } else if let Some(rest) = description.strip_prefix("IVF") {
        let nlist = match rest.strip_suffix(",Flat") {
            Some(digits) => digits.parse::<usize>().ok().filter(|&n| n > 0),
            None => None,
        };
        match nlist {
            Some(nlist) => Backend::Ivf(IvfIndex::new(nlist)),
            None => {
                return Err(EmberError::Vector(format!(
                    "unsupported index description {description:?}"
                )))
            }
        }
    } else {
        return Err(EmberError::Vector(format!(
            "unsupported index description {description:?}"
        )));
    };
    Ok(AnnIndex {
        dim,
        metric,
        description: description.to_string(),
        backend,
    })
}

impl AnnIndex {
    /// Vector dimension this index was built for.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Similarity metric this index was built for.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// The recipe string the index was built from.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Number of vectors stored.
    pub fn ntotal(&self) -> usize {
        match &self.backend {
            Backend::Flat(flat) => flat.ntotal(self.dim),
            Backend::Ivf(ivf) => ivf.ntotal(),
        }
    }

    /// Whether the index accepts `add` calls. Flat indexes always do; IVF
    /// indexes need a [`AnnIndex::train`] call first.
    pub fn is_trained(&self) -> bool {
        match &self.backend {
            Backend::Flat(_) => true,
            Backend::Ivf(ivf) => ivf.is_trained(),
        }
    }

    /// Trains the index on `n` vectors. A no-op for flat indexes and for
    /// empty input.
    pub fn train(&mut self, x: &[f32], n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.check_buffer(x, n)?;
        match &mut self.backend {
            Backend::Flat(_) => Ok(()),
            Backend::Ivf(ivf) => {
                ivf.train(self.dim, &x[..n * self.dim]);
                Ok(())
            }
        }
    }

    /// Appends `n` vectors. The labels assigned are
    /// `[ntotal_before, ntotal_before + n)`. Empty input is a success with no
    /// effect.
    pub fn add(&mut self, x: &[f32], n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.check_buffer(x, n)?;
        match &mut self.backend {
            Backend::Flat(flat) => {
                flat.add(&x[..n * self.dim]);
                Ok(())
            }
            Backend::Ivf(ivf) => ivf.add(self.dim, &x[..n * self.dim]),
        }
    }

    /// Searches `nq` query vectors for their `k` nearest neighbors.
    ///
    /// Returns `nq * k` distances and labels, query-major. Slots with no
    /// candidate hold label `-1` and the metric's empty-slot distance.
    /// Ordering follows the metric convention documented on [`Metric`].
    pub fn search(&self, xq: &[f32], nq: usize, k: usize) -> Result<(Vec<f32>, Vec<i64>)> {
        if nq == 0 || k == 0 {
            return Ok((Vec::new(), Vec::new()));
        }
        self.check_buffer(xq, nq)?;
        let mut distances = Vec::with_capacity(nq * k);
        let mut labels = Vec::with_capacity(nq * k);
        for query in xq[..nq * self.dim].chunks_exact(self.dim) {
            let ranked = match &self.backend {
                Backend::Flat(flat) => flat.search(self.dim, self.metric, query, k),
                Backend::Ivf(ivf) => ivf.search(self.dim, self.metric, query, k)?,
            };
            for slot in 0..k {
                match ranked.get(slot) {
                    Some(&(score, label)) => {
                        distances.push(score);
                        labels.push(label);
                    }
                    None => {
                        distances.push(self.metric.empty_slot());
                        labels.push(-1);
                    }
                }
            }
        }
        Ok((distances, labels))
    }

    /// Sets the number of coarse cells probed per IVF search. Ignored by flat
    /// indexes.
    pub fn set_nprobe(&mut self, nprobe: usize) {
        if let Backend::Ivf(ivf) = &mut self.backend {
            ivf.set_nprobe(nprobe);
        }
    }

    /// Serializes the index to a file; see [`read_index`] for the format
    /// notes.
    pub fn write_to_file(&self, path: &std::path::Path) -> Result<()> {
        persist::write_index(self, path)
    }

    fn check_buffer(&self, x: &[f32], n: usize) -> Result<()> {
        if x.len() < n * self.dim {
            return Err(EmberError::InvalidArgument(format!(
                "vector buffer holds {} values, {} vectors of dimension {} need {}",
                x.len(),
                n,
                self.dim,
                n * self.dim
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Norms
// =============================================================================

pub(crate) fn l2_sqr_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = x - y;
        sum += diff * diff;
    }
    sum
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += x * y;
    }
    sum
}

/// Squared L2 norm of one vector.
pub fn l2_norm_sqr(x: &[f32]) -> f32 {
    dot(x, x)
}

/// L2 norms of `x.len() / d` packed vectors of dimension `d`.
pub fn l2_norms(x: &[f32], d: usize) -> Vec<f32> {
    if d == 0 {
        return Vec::new();
    }
    x.chunks_exact(d).map(|v| l2_norm_sqr(v).sqrt()).collect()
}

/// L2-normalizes one vector in place and returns its original norm.
///
/// Zero vectors are left untouched.
pub fn normalize(x: &mut [f32]) -> f32 {
    let norm = l2_norm_sqr(x).sqrt();
    if norm > 0.0 {
        for value in x.iter_mut() {
            *value /= norm;
        }
    }
    norm
}

/// L2-normalizes `x.len() / d` packed vectors of dimension `d` into a new
/// buffer, leaving the input untouched.
pub fn normalize_batch(x: &[f32], d: usize) -> Vec<f32> {
    let mut out = x.to_vec();
    if d == 0 {
        return out;
    }
    for vector in out.chunks_exact_mut(d) {
        normalize(vector);
    }
    out
}
