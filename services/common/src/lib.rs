//! Shared building blocks for the wait-times warehouse services
//!
//! - `config`: explicit `Settings` value (defaults, JSON file, environment)
//! - `domain`: quality flags, metric types, reference records, table names
//! - `logging`: tracing subscriber bootstrap used by every binary
//! - `db`: Postgres pool from `DatabaseSettings`
//! - `test_support`: throwaway Postgres schema for tests (`test-support` feature)

pub mod config;
pub mod db;
pub mod domain;
pub mod logging;
#[cfg(feature = "test-support")]
pub mod test_support;

pub use config::{ConfigError, Settings};
pub use domain::{LoadStatus, MetricType, QualityFlag};
