//! Read-only copy of the warehouse taken before the checks run.
//!
//! Every table is read independently. A missing or unreadable table is kept as an
//! error string so only the checks that need it fail.

use crate::error::CheckFailure;
use chrono::{DateTime, Utc};
use common::domain::tables;
use common::MetricType;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};
use uuid::Uuid;

/// Rows of one table, or why they could not be read
pub type TableRows<T> = Result<Vec<T>, String>;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ProvinceDim {
    pub province_id: i32,
    pub province_code: String,
    pub province_name: String,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ProcedureDim {
    pub procedure_id: i32,
    pub procedure_name: String,
    pub procedure_category: Option<String>,
    pub clinical_priority: Option<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct MetricDim {
    pub metric_id: i32,
    pub metric_name: String,
    pub metric_type: String,
}

impl MetricDim {
    /// Stored `metric_type`, or a guess from the metric name when the column holds
    /// something unexpected.
    pub fn kind(&self) -> Option<MetricType> {
        [
            MetricType::Percentile,
            MetricType::BenchmarkCompliance,
            MetricType::Volume,
        ]
        .into_iter()
        .find(|t| t.as_str() == self.metric_type)
        .or_else(|| MetricType::infer(&self.metric_name))
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TimeDim {
    pub time_id: i32,
    pub fiscal_year: i32,
    pub quarter: i16,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct FactRecord {
    pub fact_id: i64,
    pub province_id: i32,
    pub procedure_id: i32,
    pub metric_id: i32,
    pub time_id: i32,
    pub result_value: Option<f64>,
    pub volume_cases: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct LoadAuditRow {
    pub load_id: Uuid,
    pub source_file: Option<String>,
    pub records_processed: i64,
    pub records_inserted: i64,
    pub records_failed: i64,
    pub load_status: String,
    pub error_message: Option<String>,
    pub load_timestamp: DateTime<Utc>,
    pub load_duration_seconds: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Warehouse tables present in the current schema
    pub tables: BTreeSet<String>,
    pub row_counts: BTreeMap<String, i64>,
    pub provinces: TableRows<ProvinceDim>,
    pub procedures: TableRows<ProcedureDim>,
    pub metrics: TableRows<MetricDim>,
    pub time_periods: TableRows<TimeDim>,
    pub facts: TableRows<FactRecord>,
    /// Most recent `audit_data_loads` row
    pub latest_load: Result<Option<LoadAuditRow>, String>,
}

/// A fact joined to its four dimension rows
#[derive(Debug, Clone, Copy)]
pub struct FactView<'a> {
    pub province: &'a ProvinceDim,
    pub procedure: &'a ProcedureDim,
    pub metric: &'a MetricDim,
    pub period: &'a TimeDim,
    pub result: Option<f64>,
}

impl Snapshot {
    /// Only the table listing is fatal; per-table read errors are kept in the snapshot.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let listed: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
            "#,
        )
        .fetch_all(pool)
        .await?;
        let present: BTreeSet<String> = listed.into_iter().collect();

        let mut row_counts = BTreeMap::new();
        for table in tables::ALL.iter().filter(|t| present.contains(**t)) {
            match sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(pool)
                .await
            {
                Ok(n) => {
                    row_counts.insert(table.to_string(), n);
                }
                Err(e) => warn!(table = *table, error = %e, "could not count rows"),
            }
        }

        let provinces = read(
            pool,
            &present,
            tables::PROVINCES,
            "SELECT province_id, province_code, province_name FROM dim_provinces",
        )
        .await;
        let procedures = read(
            pool,
            &present,
            tables::PROCEDURES,
            "SELECT procedure_id, procedure_name, procedure_category, clinical_priority FROM dim_procedures",
        )
        .await;
        let metrics = read(
            pool,
            &present,
            tables::METRICS,
            "SELECT metric_id, metric_name, metric_type FROM dim_metrics",
        )
        .await;
        let time_periods = read(
            pool,
            &present,
            tables::TIME_PERIODS,
            "SELECT time_id, fiscal_year, quarter FROM dim_time_periods",
        )
        .await;
        let facts = read(
            pool,
            &present,
            tables::FACTS,
            "SELECT fact_id, province_id, procedure_id, metric_id, time_id, result_value, volume_cases \
             FROM fact_wait_times",
        )
        .await;

        let latest_load = if present.contains(tables::LOAD_AUDIT) {
            sqlx::query_as::<_, LoadAuditRow>(
                r#"
                SELECT load_id, source_file, records_processed, records_inserted, records_failed,
                       load_status, error_message, load_timestamp, load_duration_seconds
                FROM audit_data_loads
                ORDER BY load_timestamp DESC
                LIMIT 1
                "#,
            )
            .fetch_optional(pool)
            .await
            .map_err(|e| format!("failed to read {}: {}", tables::LOAD_AUDIT, e))
        } else {
            Err(missing(tables::LOAD_AUDIT))
        };

        debug!(tables = present.len(), "warehouse snapshot taken");
        Ok(Self {
            tables: present,
            row_counts,
            provinces,
            procedures,
            metrics,
            time_periods,
            facts,
            latest_load,
        })
    }

    pub fn provinces(&self) -> Result<&[ProvinceDim], CheckFailure> {
        rows(tables::PROVINCES, &self.provinces)
    }

    pub fn procedures(&self) -> Result<&[ProcedureDim], CheckFailure> {
        rows(tables::PROCEDURES, &self.procedures)
    }

    pub fn metrics(&self) -> Result<&[MetricDim], CheckFailure> {
        rows(tables::METRICS, &self.metrics)
    }

    pub fn time_periods(&self) -> Result<&[TimeDim], CheckFailure> {
        rows(tables::TIME_PERIODS, &self.time_periods)
    }

    pub fn facts(&self) -> Result<&[FactRecord], CheckFailure> {
        rows(tables::FACTS, &self.facts)
    }

    pub fn latest_load(&self) -> Result<Option<&LoadAuditRow>, CheckFailure> {
        self.latest_load
            .as_ref()
            .map(Option::as_ref)
            .map_err(|reason| CheckFailure::TableUnavailable {
                table: tables::LOAD_AUDIT,
                reason: reason.clone(),
            })
    }

    /// Facts inner-joined to all four dimensions. Orphans are left out.
    pub fn joined(&self) -> Result<Vec<FactView<'_>>, CheckFailure> {
        let provinces: HashMap<i32, &ProvinceDim> =
            self.provinces()?.iter().map(|p| (p.province_id, p)).collect();
        let procedures: HashMap<i32, &ProcedureDim> =
            self.procedures()?.iter().map(|p| (p.procedure_id, p)).collect();
        let metrics: HashMap<i32, &MetricDim> =
            self.metrics()?.iter().map(|m| (m.metric_id, m)).collect();
        let periods: HashMap<i32, &TimeDim> =
            self.time_periods()?.iter().map(|t| (t.time_id, t)).collect();

        Ok(self
            .facts()?
            .iter()
            .filter_map(|f| {
                Some(FactView {
                    province: provinces.get(&f.province_id).copied()?,
                    procedure: procedures.get(&f.procedure_id).copied()?,
                    metric: metrics.get(&f.metric_id).copied()?,
                    period: periods.get(&f.time_id).copied()?,
                    result: f.result_value,
                })
            })
            .collect())
    }
}

fn rows<'a, T>(table: &'static str, rows: &'a TableRows<T>) -> Result<&'a [T], CheckFailure> {
    rows.as_deref().map_err(|reason| CheckFailure::TableUnavailable {
        table,
        reason: reason.clone(),
    })
}

fn missing(table: &str) -> String {
    format!("table {} does not exist", table)
}

async fn read<T>(pool: &PgPool, present: &BTreeSet<String>, table: &str, sql: &str) -> TableRows<T>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    if !present.contains(table) {
        return Err(missing(table));
    }
    sqlx::query_as::<_, T>(sql)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            warn!(table, error = %e, "could not read table");
            format!("failed to read {}: {}", table, e)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(name: &str, kind: &str) -> MetricDim {
        MetricDim {
            metric_id: 1,
            metric_name: name.to_string(),
            metric_type: kind.to_string(),
        }
    }

    #[test]
    fn test_metric_kind_prefers_stored_type() {
        assert_eq!(
            metric("50th Percentile", "Percentile").kind(),
            Some(MetricType::Percentile)
        );
        assert_eq!(
            metric("% Meeting Benchmark", "Benchmark_Compliance").kind(),
            Some(MetricType::BenchmarkCompliance)
        );
        assert_eq!(metric("Volume", "Other").kind(), Some(MetricType::Volume));
        assert_eq!(metric("Mystery", "Other").kind(), None);
    }

    #[test]
    fn test_missing_table_only_fails_its_accessor() {
        let snapshot = Snapshot {
            tables: BTreeSet::new(),
            row_counts: BTreeMap::new(),
            provinces: Ok(vec![]),
            procedures: Err(missing(tables::PROCEDURES)),
            metrics: Ok(vec![]),
            time_periods: Ok(vec![]),
            facts: Ok(vec![]),
            latest_load: Ok(None),
        };
        assert!(snapshot.provinces().is_ok());
        let err = snapshot.procedures().unwrap_err();
        assert_eq!(err.to_string(), "dim_procedures unavailable: table dim_procedures does not exist");
        assert!(snapshot.joined().is_err());
        assert!(snapshot.latest_load().unwrap().is_none());
    }
}
