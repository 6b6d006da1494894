//! Run configuration.
//!
//! [`MatchSettings`] is the loose, all-optional input a caller fills in; [`Config::from_settings`]
//! validates it once and yields an immutable [`Config`] that the pipeline only reads.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::algos::{Algorithm, AlgorithmSet};
use crate::error::{Error, Result};

pub const DEFAULT_STR_LEN_DELTA_PCT: f64 = 50.0;
pub const DEFAULT_COMMIT_SIZE: usize = 500;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Where rows are read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// SQLite database file
    pub database: PathBuf,
    /// A table name, or a full statement starting with `SELECT`
    pub table_query: String,
    /// Columns that make up a row's compared string and content hash (all columns when empty)
    pub hash_columns: BTreeSet<String>,
}

impl SourceDescriptor {
    pub fn new(database: impl Into<PathBuf>, table_query: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table_query: table_query.into(),
            hash_columns: BTreeSet::new(),
        }
    }

    pub fn with_hash_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hash_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// The statement to run against the source.
    pub fn sql(&self) -> String {
        let trimmed = self.table_query.trim();
        let is_select = trimmed
            .get(..6)
            .map_or(false, |prefix| prefix.eq_ignore_ascii_case("select"));
        if is_select {
            trimmed.to_string()
        } else {
            format!("SELECT * FROM {}", trimmed)
        }
    }
}

/// Where row snapshots and match scores are persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetDescriptor {
    /// Database vendor; selects the bootstrap script
    pub vendor: String,
    pub database: PathBuf,
}

impl TargetDescriptor {
    /// A SQLite target
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            vendor: "sqlite".to_string(),
            database: database.into(),
        }
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }
}

/// How per-algorithm qualifications combine into one match decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Aggregation {
    /// Every algorithm must qualify
    All,
    /// At least one algorithm must qualify
    #[default]
    Any,
}

/// Unvalidated settings for a run.
#[derive(Clone, Debug, Default)]
pub struct MatchSettings {
    pub source: Option<SourceDescriptor>,
    pub target: Option<TargetDescriptor>,
    /// Later entries replace earlier ones of the same kind
    pub algorithms: Vec<Algorithm>,
    pub aggregation: Option<Aggregation>,
    pub ignore_dupes: Option<bool>,
    pub str_len_delta_pct: Option<f64>,
    pub commit_size: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub shutdown_timeout: Option<Duration>,
}

/// Validated, immutable run configuration.
#[derive(Clone, Debug)]
pub struct Config {
    source: SourceDescriptor,
    target: Option<TargetDescriptor>,
    algorithms: AlgorithmSet,
    aggregation: Aggregation,
    ignore_dupes: bool,
    str_len_delta_pct: f64,
    commit_size: usize,
    queue_capacity: usize,
    shutdown_timeout: Duration,
}

impl Config {
    pub fn from_settings(settings: MatchSettings) -> Result<Self> {
        let source = settings
            .source
            .ok_or_else(|| Error::Configuration("a source must be set".to_string()))?;

        let str_len_delta_pct = settings
            .str_len_delta_pct
            .unwrap_or(DEFAULT_STR_LEN_DELTA_PCT);
        if !str_len_delta_pct.is_finite() || str_len_delta_pct < 0.0 {
            return Err(Error::Configuration(format!(
                "string length delta must be a non-negative percentage, got {}",
                str_len_delta_pct
            )));
        }

        let commit_size = settings.commit_size.unwrap_or(DEFAULT_COMMIT_SIZE);
        if commit_size == 0 {
            return Err(Error::Configuration("commit size must be at least 1".to_string()));
        }

        let queue_capacity = settings.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(Error::Configuration("queue capacity must be at least 1".to_string()));
        }

        let config = Config {
            source,
            target: settings.target,
            algorithms: settings.algorithms.into_iter().collect(),
            aggregation: settings.aggregation.unwrap_or_default(),
            ignore_dupes: settings.ignore_dupes.unwrap_or(false),
            str_len_delta_pct,
            commit_size,
            queue_capacity,
            shutdown_timeout: settings.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
        };
        tracing::trace!("Built config {:?}", config);
        Ok(config)
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    pub fn target(&self) -> Option<&TargetDescriptor> {
        self.target.as_ref()
    }

    pub fn algorithms(&self) -> &AlgorithmSet {
        &self.algorithms
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn ignore_dupes(&self) -> bool {
        self.ignore_dupes
    }

    pub fn str_len_delta_pct(&self) -> f64 {
        self.str_len_delta_pct
    }

    pub fn commit_size(&self) -> usize {
        self.commit_size
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}
