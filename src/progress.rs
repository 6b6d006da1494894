//! Progress reporting for source reads and the pairwise scan.
//!
//! Interactive runs get indicatif bars. With `--log-only` the bars stay hidden and the scan
//! reports through the log every [`LOG_INTERVAL`] anchor rows instead.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Anchor rows between progress lines in log-only mode
pub const LOG_INTERVAL: u64 = 1_000;

const SCAN_TEMPLATE: &str =
    "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} anchors ({per_sec}, ETA: {eta})";

static LOG_ONLY: AtomicBool = AtomicBool::new(false);

/// Hide progress bars for the rest of the process (set from args in main).
pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

fn log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

/// Progress over the anchor rows of one scan.
pub struct ScanProgress {
    bar: ProgressBar,
    total: u64,
    interval: u64,
}

impl ScanProgress {
    pub fn new(total: u64) -> Self {
        Self::with_interval(total, LOG_INTERVAL)
    }

    pub fn with_interval(total: u64, interval: u64) -> Self {
        let bar = ProgressBar::new(total);
        if log_only() {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        } else {
            let style = ProgressStyle::default_bar()
                .template(SCAN_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ");
            bar.set_style(style);
        }
        bar.set_message("Scanning rows");
        Self {
            bar,
            total,
            interval: interval.max(1),
        }
    }

    /// Mark one more anchor row as fully compared; returns whether a log line was due.
    pub fn anchor_done(&self) -> bool {
        self.bar.inc(1);
        let done = self.bar.position();
        let due = done % self.interval == 0 || done == self.total;
        if due && log_only() {
            let pct = 100.0 * done as f64 / self.total.max(1) as f64;
            tracing::info!("[Scanning rows] {}/{} anchors ({:.1}%)", done, self.total, pct);
        }
        due
    }

    pub fn finish(&self, rows: u64) {
        self.bar.finish_with_message(format!("Scanned {} rows", rows));
    }

    /// Leave the bar where it stopped, for cancelled scans.
    pub fn abandon(&self) {
        self.bar.abandon_with_message("Scan cancelled");
    }
}

/// Spinner for reads whose row count is unknown up front. Hidden in log-only mode.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        let style = ProgressStyle::default_spinner()
            .template("{msg} {spinner} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}
