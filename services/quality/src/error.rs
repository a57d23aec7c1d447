use std::path::PathBuf;
use thiserror::Error;

/// Why a single quality check failed. Recorded in the report; never aborts the run.
#[derive(Debug, Error)]
pub enum CheckFailure {
    #[error("{table} unavailable: {reason}")]
    TableUnavailable { table: &'static str, reason: String },

    #[error("Missing tables: {}", .0.join(", "))]
    MissingTables(Vec<String>),

    #[error("{}", .0.join("; "))]
    OrphanedRecords(Vec<String>),

    #[error("Data completeness too low: {actual:.2}% (minimum: {minimum:.1}%)")]
    LowCompleteness { actual: f64, minimum: f64 },
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write quality report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize quality report: {0}")]
    Serialize(#[from] serde_json::Error),
}
