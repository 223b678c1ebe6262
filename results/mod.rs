//! Output side of the harness: the long-format metrics table and the per-run
//! artifacts written next to it.

pub mod aggregator;
pub mod files;
pub mod records;

pub use aggregator::{ResultAggregator, read_table};
pub use records::{MetricName, MetricRecord, Partition, RecordContext, RunStatus};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to write tab-separated output: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to serialize options: {0}")]
    Toml(#[from] toml::ser::Error),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error("A writer lock was poisoned by a panicking thread.")]
    Poisoned,
}
