use std::path::PathBuf;
use thiserror::Error;

/// The source could not be turned into a `RawTable`. Raised before any database write.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("source file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open workbook {path}: {message}")]
    Workbook { path: PathBuf, message: String },
    #[error("sheet '{sheet}' not found (available: {available:?})")]
    SheetMissing {
        sheet: String,
        available: Vec<String>,
    },
    #[error("sheet has {found} columns, expected at least {expected}")]
    TooNarrow { expected: usize, found: usize },
    #[error("malformed csv at record {record}: {message}")]
    Csv { record: usize, message: String },
    #[error("no data rows after header row {header_row}")]
    Empty { header_row: usize },
}

#[derive(Debug, Error)]
#[error("failed to load dimension {dimension}: {source}")]
pub struct DimensionLoadError {
    pub dimension: &'static str,
    #[source]
    pub source: sqlx::Error,
}

#[derive(Debug, Error)]
pub enum FactLoadError {
    #[error("failed to read dimension keys from {table}: {source}")]
    Lookup {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("fact load rolled back: {0}")]
    Write(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
#[error("load audit {action} failed: {source}")]
pub struct AuditError {
    pub action: &'static str,
    #[source]
    pub source: sqlx::Error,
}

/// Fatal pipeline failures. Everything else is accumulated in the summary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Dimension(#[from] DimensionLoadError),
    #[error(transparent)]
    Facts(#[from] FactLoadError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}
