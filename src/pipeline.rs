//! Run orchestration.
//!
//! A run is one producer thread (scan, then statistics) and, when a target is configured, one
//! writer thread, connected by a bounded queue of batches. The producer always finishes the
//! stream with an empty batch and then hands its report back over a single-slot channel. After
//! that the orchestrator waits a bounded time for both threads; anything still running is told
//! to stop and left behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use crossbeam_channel::{bounded, Sender};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Batch, RunReport};
use crate::persist::{writer_loop, BatchSink, SqliteBatchWriter};
use crate::progress::format_duration;
use crate::scan::{scan, ScanOutcome};
use crate::source::{open_sqlite, RowSource};

const PRODUCER: &str = "producer";
const WRITER: &str = "writer";

/// Match every row of the configured source against every later row.
///
/// Reads the source, bootstraps the target (if any) under a fresh Unix-seconds timestamp and
/// runs the pipeline.
pub fn run(config: &Config) -> Result<RunReport> {
    let source = open_sqlite(config.source())?;

    let target = match config.target() {
        Some(target) => {
            let timestamp = unix_timestamp();
            let writer = SqliteBatchWriter::open(target, &timestamp)?;
            Some((Box::new(writer) as Box<dyn BatchSink>, timestamp))
        }
        None => None,
    };

    run_with(config, Box::new(source), target)
}

/// Run the pipeline over an already opened source and sink.
///
/// `target` pairs the sink with the timestamp its tables were created under; without it the
/// producer runs alone and batches are discarded.
pub fn run_with(
    config: &Config,
    source: Box<dyn RowSource>,
    target: Option<(Box<dyn BatchSink>, String)>,
) -> Result<RunReport> {
    let start = Instant::now();
    let cancel = Arc::new(AtomicBool::new(false));
    let (batch_tx, batch_rx) = bounded::<Batch>(config.queue_capacity());
    let (report_tx, report_rx) = bounded::<Result<RunReport>>(1);
    let (done_tx, done_rx) = bounded::<&'static str>(2);

    let persist = target.is_some();
    let (sink, target_timestamp) = match target {
        Some((sink, timestamp)) => (Some(sink), Some(timestamp)),
        None => (None, None),
    };

    // Without a writer the queue is held open here so the sentinel still has somewhere to go
    let mut held_rx = None;
    let mut tasks: Vec<(&'static str, JoinHandle<Result<()>>)> = Vec::with_capacity(2);

    match sink {
        Some(mut sink) => {
            let cancel = Arc::clone(&cancel);
            let done_tx = done_tx.clone();
            tasks.push((
                WRITER,
                std::thread::spawn(move || {
                    let _done = DoneGuard::new(WRITER, done_tx);
                    let result = writer_loop(batch_rx, sink.as_mut(), &cancel).map(|_| ());
                    if result.is_err() {
                        cancel.store(true, Ordering::Relaxed);
                    }
                    result
                }),
            ));
        }
        None => held_rx = Some(batch_rx),
    }

    {
        let config = config.clone();
        let cancel = Arc::clone(&cancel);
        let mut source = source;
        tasks.push((
            PRODUCER,
            std::thread::spawn(move || {
                let _done = DoneGuard::new(PRODUCER, done_tx);
                let result = produce(
                    source.as_mut(),
                    &config,
                    &cancel,
                    &batch_tx,
                    persist,
                    target_timestamp,
                );
                report_tx
                    .send(result)
                    .map_err(|_| Error::InterruptedWait("run report".to_string()))
            }),
        ));
    }

    let produced = report_rx
        .recv()
        .map_err(|_| Error::InterruptedWait("run report".to_string()));

    let joined = shutdown(config, &cancel, tasks, &done_rx);
    drop(held_rx);

    let mut writer_error = None;
    for (name, result) in joined {
        match result {
            Err(e) if name == WRITER => writer_error = Some(e),
            // A failed report send already shows up in `produced`
            Err(e) => tracing::debug!("{} task ended with: {}", name, e),
            Ok(()) => {}
        }
    }

    // A writer failure explains a cancelled producer, so it is reported first
    let report = match (writer_error, produced) {
        (Some(e), _) if !matches!(e, Error::Cancelled) => return Err(e),
        (_, Err(e)) | (_, Ok(Err(e))) => return Err(e),
        (Some(e), Ok(Ok(_))) => return Err(e),
        (None, Ok(Ok(report))) => report,
    };
    tracing::info!(
        "Run finished in {}: {} rows, {} comparisons, {} matches, {} duplicates",
        format_duration(start.elapsed()),
        report.row_count,
        report.comparison_count,
        report.match_count,
        report.duplicate_count
    );
    Ok(report)
}

/// Scan, always close the stream, then summarize.
fn produce(
    source: &mut dyn RowSource,
    config: &Config,
    cancel: &AtomicBool,
    batch_tx: &Sender<Batch>,
    persist: bool,
    target_timestamp: Option<String>,
) -> Result<RunReport> {
    let outcome = scan(source, config, cancel, |batch| {
        if !persist {
            return Ok(());
        }
        batch_tx.send(batch).map_err(|_| {
            tracing::warn!("Writer is gone, stopping scan");
            Error::Cancelled
        })
    });

    if batch_tx.send(Batch::sentinel()).is_err() {
        tracing::debug!("Writer already stopped before the end-of-stream batch");
    }

    let ScanOutcome {
        row_count,
        comparison_count,
        match_count,
        duplicate_count,
        stats,
    } = outcome?;

    tracing::info!("Calculating statistics for the run");
    let algorithms = stats.finish();
    for (kind, summary) in &algorithms {
        tracing::info!(
            "{}: min {:.3}, median {:.3}, max {:.3}, mean {:.3}, std dev {:.3}",
            kind,
            summary.min,
            summary.median,
            summary.max,
            summary.mean,
            summary.std_deviation
        );
    }

    Ok(RunReport {
        row_count,
        comparison_count,
        match_count,
        duplicate_count,
        algorithms,
        run_timestamp: Utc::now().to_rfc3339(),
        target_timestamp,
    })
}

/// Wait up to the shutdown timeout for every task, then cancel and detach the rest.
fn shutdown(
    config: &Config,
    cancel: &AtomicBool,
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
    done_rx: &crossbeam_channel::Receiver<&'static str>,
) -> Vec<(&'static str, Result<()>)> {
    let deadline = Instant::now() + config.shutdown_timeout();
    let mut finished: Vec<&'static str> = Vec::with_capacity(tasks.len());

    while finished.len() < tasks.len() {
        match done_rx.recv_deadline(deadline) {
            Ok(name) => {
                tracing::debug!("{} task finished", name);
                finished.push(name);
            }
            Err(_) => {
                tracing::warn!(
                    "{} task(s) still running after {}, cancelling",
                    tasks.len() - finished.len(),
                    format_duration(config.shutdown_timeout())
                );
                cancel.store(true, Ordering::Relaxed);
                break;
            }
        }
    }

    tasks
        .into_iter()
        .filter_map(|(name, handle)| {
            if !finished.contains(&name) {
                tracing::warn!("Detaching {} task", name);
                return None;
            }
            let result = handle
                .join()
                .unwrap_or_else(|_| Err(Error::InterruptedWait(format!("{} task panicked", name))));
            Some((name, result))
        })
        .collect()
}

/// Signals task completion on drop, so a panicking task is still counted as done.
struct DoneGuard {
    name: &'static str,
    done_tx: Sender<&'static str>,
}

impl DoneGuard {
    fn new(name: &'static str, done_tx: Sender<&'static str>) -> Self {
        Self { name, done_tx }
    }
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.done_tx.send(self.name);
    }
}

fn unix_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
        .to_string()
}
