//! Core data models for a matching run.
//!
//! Row snapshots and match records flow from the scan engine to the persistence writer in
//! [`Batch`]es; [`RunReport`] is the single summary produced at the end of a run.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::algos::{AlgorithmKind, Score};
use crate::error::Result;

// ============================================================================
// Row and Match Records
// ============================================================================

/// A source row as persisted: its content hash and the JSON object of all its columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowSnapshot {
    pub id: String,
    pub serialized_data: String,
}

/// A qualifying row pair with every configured algorithm's score.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchRecord {
    pub id: String,
    pub anchor_row_id: String,
    pub compared_row_id: String,
    pub scores: BTreeMap<AlgorithmKind, Score>,
}

/// Transfer unit between the producer and the persistence consumer.
/// An empty batch marks the end of the stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    pub row_snapshots: Vec<RowSnapshot>,
    pub match_records: Vec<MatchRecord>,
}

impl Batch {
    /// The end-of-stream sentinel
    pub fn sentinel() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.row_snapshots.is_empty() && self.match_records.is_empty()
    }
}

// ============================================================================
// Report
// ============================================================================

/// Distribution of one algorithm's scores over a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlgoStats {
    pub min: f64,
    pub first_quartile: f64,
    pub median: f64,
    pub third_quartile: f64,
    pub max: f64,
    pub mean: f64,
    pub std_deviation: f64,
}

/// Summary of a matching run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    /// Anchor positions visited
    pub row_count: u64,
    /// Algorithm evaluations performed
    pub comparison_count: u64,
    pub match_count: u64,
    /// Pairs skipped because both rows had the same content hash
    pub duplicate_count: u64,
    /// Stats per algorithm kind; kinds that never scored are absent
    pub algorithms: BTreeMap<AlgorithmKind, AlgoStats>,
    /// When the run finished (RFC 3339)
    pub run_timestamp: String,
    /// Suffix of the target tables, when a target was configured
    pub target_timestamp: Option<String>,
}

impl RunReport {
    /// Write the report to a JSON file
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
