//! Pairwise scan engine.
//!
//! Every row is compared against every row after it. Pairs with identical content hashes can be
//! skipped as duplicates, pairs whose lengths are too far apart are skipped silently, and the
//! rest are scored by every configured algorithm. Row snapshots and qualifying matches are
//! handed to an emitter in batches of at most `commit_size` entries per list.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rustc_hash::FxHashSet;
use uuid::Uuid;

use crate::algos::AlgorithmResult;
use crate::config::{Aggregation, Config};
use crate::error::{Error, Result};
use crate::models::{Batch, MatchRecord, RowSnapshot};
use crate::progress::{format_duration, ScanProgress};
use crate::source::{Row, RowSource};
use crate::stats::StatsAggregator;
use crate::strings::check_str_len;

/// Combine per-algorithm decisions into a match decision.
///
/// Under [`Aggregation::All`] an empty result set qualifies, since nothing disqualifies it.
pub fn qualifies(mode: Aggregation, results: &[AlgorithmResult<'_>]) -> bool {
    match mode {
        Aggregation::All => results.iter().all(|r| r.qualifies),
        Aggregation::Any => results.iter().any(|r| r.qualifies),
    }
}

/// Counters and collected scores of a finished scan.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub row_count: u64,
    pub comparison_count: u64,
    pub match_count: u64,
    pub duplicate_count: u64,
    pub stats: StatsAggregator,
}

// ============================================================================
// Batching
// ============================================================================

/// Accumulates snapshots and match records, handing out a batch once either list is full.
#[derive(Debug)]
pub struct BatchBuilder {
    commit_size: usize,
    current: Batch,
    seen: FxHashSet<String>,
}

impl BatchBuilder {
    pub fn new(commit_size: usize) -> Self {
        Self {
            commit_size,
            current: Batch::default(),
            seen: FxHashSet::default(),
        }
    }

    /// Record a row's snapshot the first time its id is seen.
    pub fn add_row(&mut self, row: &Row) -> Option<Batch> {
        if self.seen.contains(&row.id) {
            return None;
        }
        self.seen.insert(row.id.clone());
        self.current.row_snapshots.push(RowSnapshot {
            id: row.id.clone(),
            serialized_data: row.serialized.clone(),
        });
        self.take_if_full()
    }

    pub fn add_match(&mut self, record: MatchRecord) -> Option<Batch> {
        self.current.match_records.push(record);
        self.take_if_full()
    }

    /// Whatever is left; `None` when nothing is pending.
    pub fn finish(&mut self) -> Option<Batch> {
        if self.current.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.current))
        }
    }

    fn take_if_full(&mut self) -> Option<Batch> {
        if self.current.row_snapshots.len() >= self.commit_size
            || self.current.match_records.len() >= self.commit_size
        {
            Some(std::mem::take(&mut self.current))
        } else {
            None
        }
    }
}

// ============================================================================
// Scan
// ============================================================================

/// Run the full upper-triangular scan over `source`.
///
/// `emit` receives each full batch and the final partial batch, but never the end-of-stream
/// sentinel. The scan stops with [`Error::Cancelled`] once `cancel` is raised.
pub fn scan<F>(
    source: &mut dyn RowSource,
    config: &Config,
    cancel: &AtomicBool,
    mut emit: F,
) -> Result<ScanOutcome>
where
    F: FnMut(Batch) -> Result<()>,
{
    let start = Instant::now();
    let total = source.len() as u64;
    let algorithms = config.algorithms();
    let pct = config.str_len_delta_pct();

    tracing::info!(
        "Beginning fuzzy matching over {} rows with {} algorithm(s), aggregation {:?}",
        total,
        algorithms.len(),
        config.aggregation()
    );
    if algorithms.is_empty() && config.aggregation() == Aggregation::All {
        tracing::warn!("No algorithms configured with ALL aggregation: every eligible pair will match");
    }

    let progress = ScanProgress::new(total);
    let mut outcome = ScanOutcome::default();
    let mut batches = BatchBuilder::new(config.commit_size());
    let mut position = 0;

    while source.absolute(position) {
        if cancel.load(Ordering::Relaxed) {
            progress.abandon();
            return Err(Error::Cancelled);
        }
        let anchor = match source.fetch()? {
            Some(row) => row,
            None => break,
        };
        outcome.row_count += 1;
        if let Some(batch) = batches.add_row(&anchor) {
            emit_batch(&mut emit, batch)?;
        }

        while let Some(candidate) = source.fetch()? {
            if cancel.load(Ordering::Relaxed) {
                progress.abandon();
                return Err(Error::Cancelled);
            }
            if let Some(batch) = batches.add_row(&candidate) {
                emit_batch(&mut emit, batch)?;
            }

            if config.ignore_dupes() && anchor.id == candidate.id {
                outcome.duplicate_count += 1;
                tracing::trace!(
                    "Duplicate found: {:?} is identical to {:?}, skipping comparison",
                    anchor.data,
                    candidate.data
                );
                continue;
            }

            if !check_str_len(&candidate.data, &anchor.data, pct) {
                tracing::trace!(
                    "{:?} ({} chars) will not be checked against {:?} ({} chars)",
                    candidate.data,
                    candidate.data.chars().count(),
                    anchor.data,
                    anchor.data.chars().count()
                );
                continue;
            }

            let results: Vec<AlgorithmResult<'_>> = algorithms
                .iter()
                .map(|algo| algo.evaluate(&candidate.data, &anchor.data, &candidate.id, &anchor.id))
                .collect();
            outcome.comparison_count += results.len() as u64;
            for result in &results {
                outcome.stats.record(result);
            }

            if qualifies(config.aggregation(), &results) {
                outcome.match_count += 1;
                let scores: BTreeMap<_, _> = results.iter().map(|r| (r.kind, r.score)).collect();
                let record = MatchRecord {
                    id: Uuid::new_v4().to_string(),
                    anchor_row_id: anchor.id.clone(),
                    compared_row_id: candidate.id.clone(),
                    scores,
                };
                if let Some(batch) = batches.add_match(record) {
                    emit_batch(&mut emit, batch)?;
                }
            }
        }

        position += 1;
        progress.anchor_done();
    }

    if let Some(batch) = batches.finish() {
        emit_batch(&mut emit, batch)?;
    }

    progress.finish(outcome.row_count);
    tracing::info!(
        "Fuzzy match is complete in {}. {} comparisons calculated, {} matches, {} duplicates skipped",
        format_duration(start.elapsed()),
        outcome.comparison_count,
        outcome.match_count,
        outcome.duplicate_count
    );
    Ok(outcome)
}

fn emit_batch<F>(emit: &mut F, batch: Batch) -> Result<()>
where
    F: FnMut(Batch) -> Result<()>,
{
    tracing::debug!(
        "Emitting batch: {} row snapshots, {} match records",
        batch.row_snapshots.len(),
        batch.match_records.len()
    );
    emit(batch)
}
