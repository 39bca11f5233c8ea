// Copyright (c) 2025 EmberDB Contributors
// Licensed under the EmberDB License. See LICENSE file for details.

//! Exact brute-force index: every search scans every stored vector.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::Metric;

/// Flat storage of packed vectors; label = position.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct FlatIndex {
    data: Vec<f32>,
}

impl FlatIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ntotal(&self, dim: usize) -> usize {
        self.data.len() / dim
    }

    pub(crate) fn add(&mut self, x: &[f32]) {
        self.data.extend_from_slice(x);
    }

    /// Ranks all stored vectors against the query and returns the best `k`
    /// as `(score, label)` pairs in metric order.
    pub(crate) fn search(
        &self,
        dim: usize,
        metric: Metric,
        query: &[f32],
        k: usize,
    ) -> Vec<(f32, i64)> {
        let mut ranked: Vec<(f32, i64)> = self
            .data
            .chunks_exact(dim)
            .enumerate()
            .map(|(label, vector)| (metric.score(query, vector), label as i64))
            .collect();
        rank(metric, &mut ranked);
        ranked.truncate(k);
        ranked
    }
}

/// Sorts `(score, label)` pairs into metric order, ties broken by ascending
/// label.
pub(crate) fn rank(metric: Metric, candidates: &mut [(f32, i64)]) {
    candidates.sort_by(|a, b| {
        let by_score = match metric {
            Metric::L2 => a.0.partial_cmp(&b.0),
            Metric::InnerProduct => b.0.partial_cmp(&a.0),
        };
        by_score.unwrap_or(Ordering::Equal).then(a.1.cmp(&b.1))
    });
}
