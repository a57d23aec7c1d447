//! Where fact rows come from

use crate::error::AnalyticsError;
use crate::model::{WaitTimeQuery, WaitTimeRecord};
use async_trait::async_trait;
use common::config::NATIONAL_AGGREGATE;
use common::LoadStatus;
use sqlx::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait FactSource: Send + Sync {
    /// Non-null results matching `query`, ordered by province, procedure, year.
    async fn wait_times(&self, query: &WaitTimeQuery) -> Result<Vec<WaitTimeRecord>, AnalyticsError>;

    /// Id of the latest completed load, if any.
    async fn dataset_version(&self) -> Result<Option<Uuid>, AnalyticsError>;
}

#[async_trait]
impl<T: FactSource + ?Sized> FactSource for Arc<T> {
    async fn wait_times(&self, query: &WaitTimeQuery) -> Result<Vec<WaitTimeRecord>, AnalyticsError> {
        (**self).wait_times(query).await
    }

    async fn dataset_version(&self) -> Result<Option<Uuid>, AnalyticsError> {
        (**self).dataset_version().await
    }
}

// =============================================================================
// Postgres
// =============================================================================

pub struct PgFactSource {
    pool: PgPool,
}

impl PgFactSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FactSource for PgFactSource {
    async fn wait_times(&self, query: &WaitTimeQuery) -> Result<Vec<WaitTimeRecord>, AnalyticsError> {
        let rows = sqlx::query_as::<_, WaitTimeRecord>(
            r#"
            SELECT p.province_name       AS province,
                   pr.procedure_name     AS procedure,
                   pr.procedure_category AS procedure_category,
                   m.metric_name         AS metric,
                   t.fiscal_year         AS year,
                   f.result_value        AS value,
                   m.unit_of_measurement AS unit,
                   p.region              AS region
            FROM fact_wait_times f
            JOIN dim_provinces p     ON f.province_id = p.province_id
            JOIN dim_procedures pr   ON f.procedure_id = pr.procedure_id
            JOIN dim_metrics m       ON f.metric_id = m.metric_id
            JOIN dim_time_periods t  ON f.time_id = t.time_id
            WHERE t.fiscal_year BETWEEN $1 AND $2
              AND m.metric_name = $3
              AND f.result_value IS NOT NULL
              AND p.province_name <> $4
              AND ($5::text IS NULL OR strpos(lower(p.province_name), lower($5)) > 0)
              AND ($6::text IS NULL OR strpos(lower(pr.procedure_name), lower($6)) > 0)
            ORDER BY p.province_name, pr.procedure_name, t.fiscal_year
            "#,
        )
        .bind(query.start_year)
        .bind(query.end_year)
        .bind(query.metric.as_str())
        .bind(NATIONAL_AGGREGATE)
        .bind(query.province.as_deref())
        .bind(query.procedure.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(AnalyticsError::Query)?;

        debug!(rows = rows.len(), ?query, "wait-time rows fetched");
        Ok(rows)
    }

    async fn dataset_version(&self) -> Result<Option<Uuid>, AnalyticsError> {
        sqlx::query_scalar(
            r#"
            SELECT load_id FROM audit_data_loads
            WHERE load_status = $1
            ORDER BY load_timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(LoadStatus::Completed.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(AnalyticsError::Version)
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Fixed records behind the same filter semantics as the warehouse query.
/// `reload` swaps the data and version the way a new ETL run would.
#[derive(Default)]
pub struct InMemorySource {
    state: Mutex<(Vec<WaitTimeRecord>, Option<Uuid>)>,
    queries: AtomicUsize,
}

impl InMemorySource {
    pub fn new(records: Vec<WaitTimeRecord>, version: Option<Uuid>) -> Self {
        Self {
            state: Mutex::new((records, version)),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn reload(&self, records: Vec<WaitTimeRecord>, version: Option<Uuid>) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = (records, version);
    }

    /// Number of `wait_times` calls served so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FactSource for InMemorySource {
    async fn wait_times(&self, query: &WaitTimeQuery) -> Result<Vec<WaitTimeRecord>, AnalyticsError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<WaitTimeRecord> = state.0.iter().filter(|r| query.matches(r)).cloned().collect();
        rows.sort_by(|a, b| {
            (&a.province, &a.procedure, a.year).cmp(&(&b.province, &b.procedure, b.year))
        });
        Ok(rows)
    }

    async fn dataset_version(&self) -> Result<Option<Uuid>, AnalyticsError> {
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner).1)
    }
}
