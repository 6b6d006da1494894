use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use fuzzy_row_matcher::algos::Algorithm;
use fuzzy_row_matcher::config::{Aggregation, Config, MatchSettings, SourceDescriptor, TargetDescriptor};
use fuzzy_row_matcher::progress::{format_duration, set_log_only};
use fuzzy_row_matcher::{pipeline, RunReport};

#[derive(Parser)]
#[command(name = "fuzzy-row-matcher")]
#[command(about = "Find near-duplicate rows in a SQLite table with fuzzy string matching")]
struct Args {
    /// Source SQLite database
    source: PathBuf,

    /// Table name, or a SELECT statement
    #[arg(long)]
    table: String,

    /// Columns compared and hashed (comma-separated, default all)
    #[arg(long)]
    hash_columns: Option<String>,

    /// Target database for row snapshots and match scores
    #[arg(long)]
    target: Option<PathBuf>,

    #[arg(long, default_value = "sqlite")]
    target_vendor: String,

    /// Jaro-Winkler threshold (0-100, match when score >= threshold)
    #[arg(long)]
    jaro: Option<f64>,

    /// Levenshtein threshold (match when distance <= threshold)
    #[arg(long)]
    levenshtein: Option<i64>,

    /// Hamming threshold (match when agreeing positions >= threshold)
    #[arg(long)]
    hamming: Option<i64>,

    /// Jaccard threshold (0-1, match when distance <= threshold)
    #[arg(long)]
    jaccard: Option<f64>,

    /// Cosine threshold (0-100, match when distance <= threshold)
    #[arg(long)]
    cosine: Option<f64>,

    /// Fuzzy score threshold (match when score >= threshold)
    #[arg(long)]
    fuzzy_score: Option<i64>,

    /// Require every algorithm to match instead of any
    #[arg(long)]
    aggregate: bool,

    /// Skip pairs of identical rows
    #[arg(long)]
    ignore_dupes: bool,

    /// Minimum shorter/longer length ratio, in percent
    #[arg(long)]
    str_len_delta_pct: Option<f64>,

    /// Rows or matches per target transaction
    #[arg(long)]
    commit_size: Option<usize>,

    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Disable progress bars, log progress lines instead (for nohup/background runs)
    #[arg(long)]
    log_only: bool,
}

impl Args {
    fn algorithms(&self) -> Vec<Algorithm> {
        let mut algorithms = Vec::new();
        if let Some(threshold) = self.jaro {
            algorithms.push(Algorithm::JaroDistance { threshold });
        }
        if let Some(threshold) = self.levenshtein {
            algorithms.push(Algorithm::LevenshteinDistance { threshold });
        }
        if let Some(threshold) = self.hamming {
            algorithms.push(Algorithm::HammingDistance { threshold });
        }
        if let Some(threshold) = self.jaccard {
            algorithms.push(Algorithm::JaccardDistance { threshold });
        }
        if let Some(threshold) = self.cosine {
            algorithms.push(Algorithm::CosineDistance { threshold });
        }
        if let Some(threshold) = self.fuzzy_score {
            algorithms.push(Algorithm::FuzzySimilarity { threshold });
        }
        algorithms
    }

    fn settings(&self) -> MatchSettings {
        let hash_columns: Vec<String> = self
            .hash_columns
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        MatchSettings {
            source: Some(
                SourceDescriptor::new(&self.source, &self.table).with_hash_columns(hash_columns),
            ),
            target: self
                .target
                .as_ref()
                .map(|db| TargetDescriptor::new(db).with_vendor(&self.target_vendor)),
            algorithms: self.algorithms(),
            aggregation: Some(if self.aggregate {
                Aggregation::All
            } else {
                Aggregation::Any
            }),
            ignore_dupes: Some(self.ignore_dupes),
            str_len_delta_pct: self.str_len_delta_pct,
            commit_size: self.commit_size,
            ..Default::default()
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn print_summary(report: &RunReport, elapsed: std::time::Duration) {
    println!("\n{:=<60}", "");
    println!("Fuzzy match complete!");
    println!("  Rows: {}", report.row_count);
    println!("  Comparisons: {}", report.comparison_count);
    println!("  Matches: {}", report.match_count);
    println!("  Duplicates skipped: {}", report.duplicate_count);
    if let Some(ts) = &report.target_timestamp {
        println!("  Target tables: json_data_{ts}, scores_{ts}, final_scores_{ts}");
    }
    for (kind, stats) in &report.algorithms {
        println!(
            "  {}: min {:.3} | q1 {:.3} | median {:.3} | q3 {:.3} | max {:.3} | mean {:.3} | sd {:.3}",
            kind,
            stats.min,
            stats.first_quartile,
            stats.median,
            stats.third_quartile,
            stats.max,
            stats.mean,
            stats.std_deviation
        );
    }
    println!("  Elapsed: {}", format_duration(elapsed));
    println!("{:=<60}", "");
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);
    init_logging();

    let start = Instant::now();
    let config = Config::from_settings(args.settings()).context("Invalid configuration")?;

    tracing::info!("Opening source database: {:?}", args.source);
    let report = pipeline::run(&config).context("Fuzzy match run failed")?;

    if let Some(path) = &args.report {
        report
            .write_to_file(path)
            .with_context(|| format!("Failed to write report to {:?}", path))?;
        tracing::info!("Wrote run report to {:?}", path);
    }

    print_summary(&report, start.elapsed());
    Ok(())
}
