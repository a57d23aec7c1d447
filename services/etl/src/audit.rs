//! Per-run rows in `audit_data_loads`

use crate::error::AuditError;
use common::LoadStatus;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

/// Final counters for one load
#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub status: LoadStatus,
    pub processed: usize,
    pub inserted: usize,
    pub failed: usize,
    pub error: Option<String>,
    pub duration_seconds: f64,
}

/// Record a run as in progress. Returns the new load id.
pub async fn start_load_audit(pool: &PgPool, source_file: &str) -> Result<Uuid, AuditError> {
    let load_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO audit_data_loads (load_id, source_file, records_processed, records_inserted,
                                      records_failed, load_status, load_timestamp)
        VALUES ($1, $2, 0, 0, 0, $3, now())
        "#,
    )
    .bind(load_id)
    .bind(source_file)
    .bind(LoadStatus::InProgress.as_str())
    .execute(pool)
    .await
    .map_err(|source| AuditError {
        action: "start",
        source,
    })?;
    Ok(load_id)
}

pub async fn finish_load_audit(
    pool: &PgPool,
    load_id: Uuid,
    outcome: &LoadOutcome,
) -> Result<(), AuditError> {
    sqlx::query(
        r#"
        UPDATE audit_data_loads
        SET records_processed = $2, records_inserted = $3, records_failed = $4,
            load_status = $5, error_message = $6, load_duration_seconds = $7
        WHERE load_id = $1
        "#,
    )
    .bind(load_id)
    .bind(outcome.processed as i64)
    .bind(outcome.inserted as i64)
    .bind(outcome.failed as i64)
    .bind(outcome.status.as_str())
    .bind(outcome.error.as_deref())
    .bind(outcome.duration_seconds)
    .execute(pool)
    .await
    .map_err(|source| AuditError {
        action: "finish",
        source,
    })?;
    Ok(())
}
