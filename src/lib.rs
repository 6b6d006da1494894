//! Fuzzy duplicate row matcher - library shared by the CLI and integration tests.

pub mod algos;
pub mod config;
pub mod error;
pub mod models;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod scan;
pub mod source;
pub mod stats;
pub mod strings;

pub use config::{Config, MatchSettings};
pub use error::{Error, Result};
pub use models::RunReport;
pub use pipeline::{run, run_with};
