//! Wait-time analytics over the loaded warehouse
//!
//! [`WaitTimeAnalyzer`] reads through a [`FactSource`] (Postgres or in-memory),
//! memoizes each distinct query in a [`QueryCache`] bound to the latest completed
//! load, and runs trend, benchmark, comparison, significance and insight analyses.

pub mod benchmark;
pub mod cache;
pub mod comparison;
pub mod engine;
pub mod error;
pub mod insights;
pub mod model;
pub mod significance;
pub mod source;
pub mod stats;
pub mod trends;

pub use cache::{CacheStats, QueryCache};
pub use engine::{TrendAnalysis, WaitTimeAnalyzer};
pub use error::AnalyticsError;
pub use model::{Analysis, WaitTimeQuery, WaitTimeRecord};
pub use source::{FactSource, InMemorySource, PgFactSource};
