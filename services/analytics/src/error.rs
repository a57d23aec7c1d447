use thiserror::Error;

/// Storage failures. Too little data is reported through [`crate::Analysis`] instead.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("wait-time query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("dataset version lookup failed: {0}")]
    Version(#[source] sqlx::Error),
}
