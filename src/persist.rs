//! Target persistence: schema bootstrap and the batch writer.
//!
//! Each run writes into its own set of tables suffixed with the run timestamp. Every batch is a
//! single transaction; a failed batch is rolled back and ends the writer.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use rusqlite::types::ToSqlOutput;
use rusqlite::{params, Connection, ToSql};

use crate::algos::{AlgorithmKind, Score};
use crate::config::TargetDescriptor;
use crate::error::{Error, Result};
use crate::models::Batch;

/// Versioned schema for SQLite targets
const SQLITE_BOOTSTRAP: &str = include_str!("../sql/bootstrap_sqlite.sql");
const TIMESTAMP_PLACEHOLDER: &str = "{timestamp}";

/// How long the writer waits on the queue before re-checking for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(200);

impl ToSql for Score {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match *self {
            Score::Integer(v) => ToSqlOutput::from(v),
            Score::Real(v) => ToSqlOutput::from(v),
        })
    }
}

// ============================================================================
// Bootstrap
// ============================================================================

/// Create the run's tables on `conn`. Only SQLite targets are recognized.
pub fn bootstrap_target(conn: &Connection, vendor: &str, timestamp: &str) -> Result<()> {
    if !vendor.eq_ignore_ascii_case("sqlite") {
        return Err(Error::UnsupportedSource(vendor.to_string()));
    }

    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| Error::Bootstrap(e.to_string()))?;

    let reused = tables_exist(conn, timestamp).map_err(|e| Error::Bootstrap(e.to_string()))?;
    if reused {
        tracing::warn!(
            "Target tables with suffix {} already exist, results will be mixed with an earlier run",
            timestamp
        );
    }

    let script = SQLITE_BOOTSTRAP.replace(TIMESTAMP_PLACEHOLDER, timestamp);
    conn.execute_batch(&script).map_err(|e| {
        tracing::error!("Error running bootstrap script: {}", e);
        Error::Bootstrap(e.to_string())
    })?;

    tracing::info!("Created target tables with suffix {}", timestamp);
    Ok(())
}

/// Whether a run with this timestamp already created its tables on `conn`.
pub fn tables_exist(conn: &Connection, timestamp: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (?1, ?2)",
        params![format!("json_data_{}", timestamp), format!("scores_{}", timestamp)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ============================================================================
// Writer
// ============================================================================

/// Destination for batches coming off the queue.
pub trait BatchSink: Send {
    fn write_batch(&mut self, batch: Batch) -> Result<()>;
}

/// Writes batches into one run's SQLite tables.
pub struct SqliteBatchWriter {
    conn: Connection,
    json_insert: String,
    score_insert: String,
}

impl SqliteBatchWriter {
    /// Open the target database and bootstrap its tables for `timestamp`.
    pub fn open(target: &TargetDescriptor, timestamp: &str) -> Result<Self> {
        if !target.vendor.eq_ignore_ascii_case("sqlite") {
            return Err(Error::UnsupportedSource(target.vendor.clone()));
        }
        let conn = open_target(&target.database)?;
        bootstrap_target(&conn, &target.vendor, timestamp)?;
        Ok(Self::new(conn, timestamp))
    }

    /// Wrap a connection whose tables already exist.
    pub fn new(conn: Connection, timestamp: &str) -> Self {
        let score_columns: Vec<&str> = AlgorithmKind::ALL.iter().map(|k| k.column_name()).collect();
        Self {
            conn,
            json_insert: format!(
                "INSERT OR IGNORE INTO json_data_{} (id, json_data) VALUES (?1, ?2)",
                timestamp
            ),
            score_insert: format!(
                "INSERT INTO scores_{} (id, left_row_id, right_row_id, {}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                timestamp,
                score_columns.join(", ")
            ),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn insert(&mut self, batch: &Batch) -> rusqlite::Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut json_stmt = tx.prepare_cached(&self.json_insert)?;
            for snapshot in &batch.row_snapshots {
                json_stmt.execute(params![snapshot.id, snapshot.serialized_data])?;
            }

            let mut score_stmt = tx.prepare_cached(&self.score_insert)?;
            for record in &batch.match_records {
                let [jaro, levenshtein, hamming, jaccard, cosine, fuzzy] =
                    AlgorithmKind::ALL.map(|kind| record.scores.get(&kind).copied());
                score_stmt.execute(params![
                    record.id,
                    record.anchor_row_id,
                    record.compared_row_id,
                    jaro,
                    levenshtein,
                    hamming,
                    jaccard,
                    cosine,
                    fuzzy,
                ])?;
            }
        }
        tx.commit()
    }
}

impl BatchSink for SqliteBatchWriter {
    fn write_batch(&mut self, batch: Batch) -> Result<()> {
        self.insert(&batch).map_err(|e| {
            tracing::error!("Error while inserting batch, rolled back: {}", e);
            Error::Persistence(e)
        })
    }
}

fn open_target(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(Error::Persistence)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(Error::Persistence)?;
    Ok(conn)
}

/// Drain the queue into `sink` until the end-of-stream batch arrives.
///
/// Returns the number of batches written. Stops with [`Error::Cancelled`] once `cancel` is
/// raised, even with batches still queued, or if the producer disappears without sending the
/// sentinel.
pub fn writer_loop(rx: Receiver<Batch>, sink: &mut dyn BatchSink, cancel: &AtomicBool) -> Result<u64> {
    tracing::info!("Initializing target writer");
    let mut written = 0u64;

    loop {
        if cancel.load(Ordering::Relaxed) {
            tracing::warn!("Writer cancelled after {} batches, {} left queued", written, rx.len());
            return Err(Error::Cancelled);
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(batch) if batch.is_empty() => {
                tracing::info!("Received end-of-stream batch after {} batches, terminating writer", written);
                return Ok(written);
            }
            Ok(batch) => {
                let (rows, matches) = (batch.row_snapshots.len(), batch.match_records.len());
                sink.write_batch(batch)?;
                written += 1;
                tracing::debug!("Wrote batch {}: {} rows, {} matches", written, rows, matches);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("Queue closed without an end-of-stream batch");
                return Err(Error::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchRecord, RowSnapshot};
    use crossbeam_channel::bounded;
    use std::collections::BTreeMap;

    const TS: &str = "1700000000";

    fn writer() -> SqliteBatchWriter {
        let conn = Connection::open_in_memory().unwrap();
        bootstrap_target(&conn, "SQLite", TS).unwrap();
        SqliteBatchWriter::new(conn, TS)
    }

    fn snapshot(id: &str) -> RowSnapshot {
        RowSnapshot {
            id: id.to_string(),
            serialized_data: format!("{{\"value\":\"{}\"}}", id),
        }
    }

    fn record(id: &str, left: &str, right: &str) -> MatchRecord {
        let mut scores = BTreeMap::new();
        scores.insert(AlgorithmKind::LevenshteinDistance, Score::Integer(1));
        scores.insert(AlgorithmKind::JaroDistance, Score::Real(91.5));
        MatchRecord {
            id: id.to_string(),
            anchor_row_id: left.to_string(),
            compared_row_id: right.to_string(),
            scores,
        }
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}_{}", table, TS), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_unknown_vendor() {
        let conn = Connection::open_in_memory().unwrap();
        let result = bootstrap_target(&conn, "oracle", TS);
        assert!(matches!(result, Err(Error::UnsupportedSource(v)) if v == "oracle"));
    }

    #[test]
    fn test_bootstrap_is_per_timestamp() {
        let conn = Connection::open_in_memory().unwrap();
        bootstrap_target(&conn, "sqlite", "1").unwrap();
        bootstrap_target(&conn, "sqlite", "2").unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') \
                 AND (name LIKE 'json_data_%' OR name LIKE 'scores_%' OR name LIKE 'final_scores_%')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn test_same_timestamp_reuses_tables() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!tables_exist(&conn, TS).unwrap());
        bootstrap_target(&conn, "sqlite", TS).unwrap();
        assert!(tables_exist(&conn, TS).unwrap());
        assert!(!tables_exist(&conn, "1700000001").unwrap());

        // A second bootstrap under the same suffix keeps the existing tables
        conn.execute(&format!("INSERT INTO json_data_{} VALUES ('A', '{{}}')", TS), [])
            .unwrap();
        bootstrap_target(&conn, "sqlite", TS).unwrap();
        assert_eq!(count(&conn, "json_data"), 1);
    }

    #[test]
    fn test_write_batch_sparse_scores() {
        let mut writer = writer();
        writer
            .write_batch(Batch {
                row_snapshots: vec![snapshot("A"), snapshot("B")],
                match_records: vec![record("m1", "A", "B")],
            })
            .unwrap();

        let conn = writer.connection();
        assert_eq!(count(conn, "json_data"), 2);
        let (lev, jaro, hamming): (i64, f64, Option<i64>) = conn
            .query_row(
                &format!(
                    "SELECT levenshtein_distance, jaro_distance, hamming_distance FROM scores_{} WHERE id = 'm1'",
                    TS
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(lev, 1);
        assert_eq!(jaro, 91.5);
        assert_eq!(hamming, None);

        let left_json: String = conn
            .query_row(
                &format!("SELECT left_json_data FROM final_scores_{} WHERE id = 'm1'", TS),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(left_json, "{\"value\":\"A\"}");
    }

    #[test]
    fn test_duplicate_snapshots_ignored() {
        let mut writer = writer();
        writer
            .write_batch(Batch {
                row_snapshots: vec![snapshot("A")],
                match_records: vec![],
            })
            .unwrap();
        writer
            .write_batch(Batch {
                row_snapshots: vec![snapshot("A"), snapshot("B")],
                match_records: vec![],
            })
            .unwrap();
        assert_eq!(count(writer.connection(), "json_data"), 2);
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let mut writer = writer();
        // The score references a row that was never written
        let result = writer.write_batch(Batch {
            row_snapshots: vec![snapshot("A")],
            match_records: vec![record("m1", "A", "missing")],
        });

        assert!(matches!(result, Err(Error::Persistence(_))));
        assert_eq!(count(writer.connection(), "json_data"), 0);
        assert_eq!(count(writer.connection(), "scores"), 0);
    }

    #[test]
    fn test_writer_loop_stops_at_sentinel() {
        let mut writer = writer();
        let (tx, rx) = bounded(4);
        tx.send(Batch {
            row_snapshots: vec![snapshot("A"), snapshot("B")],
            match_records: vec![record("m1", "A", "B")],
        })
        .unwrap();
        tx.send(Batch::sentinel()).unwrap();
        // Anything after the sentinel is never read
        tx.send(Batch {
            row_snapshots: vec![snapshot("C")],
            match_records: vec![],
        })
        .unwrap();

        let cancel = AtomicBool::new(false);
        let written = writer_loop(rx, &mut writer, &cancel).unwrap();
        assert_eq!(written, 1);
        assert_eq!(count(writer.connection(), "json_data"), 2);
        assert_eq!(count(writer.connection(), "scores"), 1);
    }

    #[test]
    fn test_writer_loop_cancelled_with_backlog() {
        let mut writer = writer();
        let (tx, rx) = bounded(4);
        for id in ["A", "B", "C"] {
            tx.send(Batch {
                row_snapshots: vec![snapshot(id)],
                match_records: vec![],
            })
            .unwrap();
        }
        tx.send(Batch::sentinel()).unwrap();

        let cancel = AtomicBool::new(true);
        assert!(matches!(writer_loop(rx, &mut writer, &cancel), Err(Error::Cancelled)));
        assert_eq!(count(writer.connection(), "json_data"), 0);
    }

    #[test]
    fn test_writer_loop_cancelled_while_idle() {
        let mut writer = writer();
        let (_tx, rx) = bounded::<Batch>(1);
        let cancel = AtomicBool::new(true);
        assert!(matches!(writer_loop(rx, &mut writer, &cancel), Err(Error::Cancelled)));
    }
}
