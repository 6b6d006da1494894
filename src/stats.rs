//! Score statistics per algorithm kind.
//!
//! Every score produced during a run is kept in memory, so memory grows with the number of
//! comparisons.

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

use crate::algos::{AlgorithmKind, AlgorithmResult};
use crate::models::AlgoStats;

#[derive(Debug, Default)]
pub struct StatsAggregator {
    scores: FxHashMap<AlgorithmKind, Vec<f64>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &AlgorithmResult<'_>) {
        self.scores
            .entry(result.kind)
            .or_default()
            .push(result.score.as_f64());
    }

    pub fn count(&self, kind: AlgorithmKind) -> usize {
        self.scores.get(&kind).map_or(0, Vec::len)
    }

    /// Summaries for every kind with at least one score.
    pub fn finish(self) -> BTreeMap<AlgorithmKind, AlgoStats> {
        self.scores
            .into_par_iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(kind, values)| (kind, summarize(values)))
            .collect()
    }
}

fn summarize(mut values: Vec<f64>) -> AlgoStats {
    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    AlgoStats {
        min: values[0],
        first_quartile: percentile(&values, 25.0),
        median: percentile(&values, 50.0),
        third_quartile: percentile(&values, 75.0),
        max: values[values.len() - 1],
        mean,
        std_deviation: variance.sqrt(),
    }
}

/// Percentile of sorted, non-empty values, estimated at position p(n+1)/100 with linear
/// interpolation between neighbours and clamping at both ends.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let pos = p * (n as f64 + 1.0) / 100.0;
    if pos < 1.0 {
        return sorted[0];
    }
    if pos >= n as f64 {
        return sorted[n - 1];
    }

    let floor = pos.floor();
    let fraction = pos - floor;
    let lower = sorted[floor as usize - 1];
    let upper = sorted[floor as usize];
    lower + fraction * (upper - lower)
}
