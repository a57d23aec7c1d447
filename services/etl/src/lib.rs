//! Wait-times ETL
//!
//! Extractor -> Cleaner -> Validator (advisory) -> Dimension loader -> Fact loader,
//! with one `audit_data_loads` row per run.
//!
//! Extraction, cleaning and validation are pure and run without a database;
//! dimension and fact loading each commit in their own transactions.

pub mod audit;
pub mod dimensions;
pub mod error;
pub mod extract;
pub mod facts;
pub mod pipeline;
pub mod transform;
pub mod validate;

pub use error::{AuditError, DimensionLoadError, ExtractionError, FactLoadError, PipelineError};
pub use pipeline::{dry_run, run_pipeline, LoadSummary, PipelineOptions};
