// Copyright (c) 2025 EmberDB Contributors
// Licensed under the EmberDB License. See LICENSE file for details.

//! Inverted-file index: vectors are bucketed under k-means centroids and a
//! search only scans the buckets whose centroids are nearest the query.
//!
//! Training runs k-means++ seeding followed by a fixed number of Lloyd
//! iterations. The coarse quantizer always assigns by squared L2 distance,
//! independent of the search metric. A fixed seed keeps training
//! deterministic for a given input.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::flat::rank;
use super::{l2_sqr_distance, Metric};
use crate::error::{EmberError, Result};

/// Lloyd iterations after seeding.
const KMEANS_ITERS: usize = 10;

/// Fixed seed for centroid initialization.
const KMEANS_SEED: u64 = 0x454D_4245_5244_4221;

/// Default number of cells probed per search.
const DEFAULT_NPROBE: usize = 8;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IvfCell {
    labels: Vec<i64>,
    data: Vec<f32>,
}

/// IVF index state. Empty until trained.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IvfIndex {
    /// Requested cell count; clamped to the training-set size at train time.
    nlist: usize,
    nprobe: usize,
    trained: bool,
    /// `cells.len() * dim` packed centroids once trained.
    centroids: Vec<f32>,
    cells: Vec<IvfCell>,
    ntotal: usize,
}

impl IvfIndex {
    pub(crate) fn new(nlist: usize) -> Self {
        Self {
            nlist,
            nprobe: DEFAULT_NPROBE,
            trained: false,
            centroids: Vec::new(),
            cells: Vec::new(),
            ntotal: 0,
        }
    }

    pub(crate) fn ntotal(&self) -> usize {
        self.ntotal
    }

    pub(crate) fn is_trained(&self) -> bool {
        self.trained
    }

    pub(crate) fn set_nprobe(&mut self, nprobe: usize) {
        self.nprobe = nprobe.max(1);
    }

    /// Trains centroids on the given packed vectors. With fewer training
    /// vectors than requested cells, the cell count is clamped.
    pub(crate) fn train(&mut self, dim: usize, x: &[f32]) {
        let n = x.len() / dim;
        let k = self.nlist.min(n).max(1);
        let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
        let mut centroids = seed_centroids(x, n, dim, k, &mut rng);

        for _ in 0..KMEANS_ITERS {
            let mut sums = vec![0.0f32; centroids.len()];
            let mut counts = vec![0usize; k];
            for vector in x.chunks_exact(dim) {
                let cell = nearest_centroid(&centroids, dim, vector);
                counts[cell] += 1;
                for (dst, &src) in sums[cell * dim..(cell + 1) * dim].iter_mut().zip(vector) {
                    *dst += src;
                }
            }
            for cell in 0..k {
                if counts[cell] == 0 {
                    continue;
                }
                let inv = 1.0f32 / counts[cell] as f32;
                for (dst, &src) in centroids[cell * dim..(cell + 1) * dim]
                    .iter_mut()
                    .zip(&sums[cell * dim..(cell + 1) * dim])
                {
                    *dst = src * inv;
                }
            }
        }

        self.centroids = centroids;
        self.cells = (0..k).map(|_| IvfCell::default()).collect();
        self.trained = true;
    }

    /// Buckets packed vectors under their nearest centroids, assigning
    /// insertion-order labels.
    pub(crate) fn add(&mut self, dim: usize, x: &[f32]) -> Result<()> {
        if !self.trained {
            return Err(EmberError::Vector(
                "IVF index must be trained before vectors are added".into(),
            ));
        }
        for vector in x.chunks_exact(dim) {
            let cell = nearest_centroid(&self.centroids, dim, vector);
            self.cells[cell].labels.push(self.ntotal as i64);
            self.cells[cell].data.extend_from_slice(vector);
            self.ntotal += 1;
        }
        Ok(())
    }

    /// Scans the `nprobe` cells nearest the query and returns the best `k`
    /// candidates in metric order.
    pub(crate) fn search(
        &self,
        dim: usize,
        metric: Metric,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(f32, i64)>> {
        if !self.trained {
            return Err(EmberError::Vector(
                "IVF index must be trained before searching".into(),
            ));
        }
        let cells = self.cells.len();
        let mut by_centroid: Vec<(f32, usize)> = self
            .centroids
            .chunks_exact(dim)
            .enumerate()
            .map(|(cell, centroid)| (l2_sqr_distance(query, centroid), cell))
            .collect();
        by_centroid
            .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut ranked = Vec::new();
        for &(_, cell) in by_centroid.iter().take(self.nprobe.min(cells)) {
            let bucket = &self.cells[cell];
            for (slot, vector) in bucket.data.chunks_exact(dim).enumerate() {
                ranked.push((metric.score(query, vector), bucket.labels[slot]));
            }
        }
        rank(metric, &mut ranked);
        ranked.truncate(k);
        Ok(ranked)
    }
}

/// k-means++ seeding: the first centroid is uniform, each further centroid is
/// drawn with probability proportional to its squared distance from the
/// nearest already-chosen centroid.
fn seed_centroids(x: &[f32], n: usize, dim: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let mut centroids = Vec::with_capacity(k * dim);
    let first = rng.gen_range(0..n);
    centroids.extend_from_slice(&x[first * dim..(first + 1) * dim]);

    while centroids.len() / dim < k {
        let mut weights = Vec::with_capacity(n);
        let mut total = 0.0f32;
        for vector in x[..n * dim].chunks_exact(dim) {
            let mut best = f32::INFINITY;
            for centroid in centroids.chunks_exact(dim) {
                best = best.min(l2_sqr_distance(vector, centroid));
            }
            weights.push(best);
            total += best;
        }
        let chosen = if total <= f32::EPSILON {
            // Every vector coincides with a centroid; any pick is as good.
            rng.gen_range(0..n)
        } else {
            let mut target = rng.gen::<f32>() * total;
            let mut chosen = n - 1;
            for (idx, weight) in weights.iter().enumerate() {
                target -= weight;
                if target <= 0.0 {
                    chosen = idx;
                    break;
                }
            }
            chosen
        };
        centroids.extend_from_slice(&x[chosen * dim..(chosen + 1) * dim]);
    }
    centroids
}

fn nearest_centroid(centroids: &[f32], dim: usize, vector: &[f32]) -> usize {
    let mut best_cell = 0usize;
    let mut best = f32::INFINITY;
    for (cell, centroid) in centroids.chunks_exact(dim).enumerate() {
        let d = l2_sqr_distance(vector, centroid);
        if d < best {
            best = d;
            best_cell = cell;
        }
    }
    best_cell
}
