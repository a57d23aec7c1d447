//! Fact resolution and batched loading

use crate::error::FactLoadError;
use crate::transform::CleanRecord;
use common::config::ReferenceData;
use common::domain::tables;
use common::{MetricType, QualityFlag};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Annual figures are attached to this quarter's time row
pub const ANNUAL_QUARTER: i16 = 1;

const BIND_PARAMS_PER_ROW: usize = 9;
const POSTGRES_BIND_LIMIT: usize = 65_535;
/// Upper bound on rows per multi-row INSERT
pub const MAX_ROWS_PER_INSERT: usize = 7_000;

const MAX_LOGGED_FAILURES: usize = 10;

/// Natural-key to surrogate-key maps, read once per load
#[derive(Debug, Clone, Default)]
pub struct DimensionKeys {
    pub provinces: HashMap<String, i32>,
    pub procedures: HashMap<String, i32>,
    pub metrics: HashMap<String, i32>,
    /// (fiscal_year, quarter) -> time_id
    pub time: HashMap<(i32, i16), i32>,
}

impl DimensionKeys {
    pub async fn load(pool: &PgPool) -> Result<Self, FactLoadError> {
        let provinces = name_map(pool, tables::PROVINCES, "province_name", "province_id").await?;
        let procedures = name_map(pool, tables::PROCEDURES, "procedure_name", "procedure_id").await?;
        let metrics = name_map(pool, tables::METRICS, "metric_name", "metric_id").await?;

        let time_rows: Vec<(i32, i16, i32)> =
            sqlx::query_as("SELECT fiscal_year, quarter, time_id FROM dim_time_periods")
                .fetch_all(pool)
                .await
                .map_err(|source| FactLoadError::Lookup {
                    table: tables::TIME_PERIODS,
                    source,
                })?;

        let keys = Self {
            provinces,
            procedures,
            metrics,
            time: time_rows
                .into_iter()
                .map(|(year, quarter, id)| ((year, quarter), id))
                .collect(),
        };
        debug!(
            provinces = keys.provinces.len(),
            procedures = keys.procedures.len(),
            metrics = keys.metrics.len(),
            time = keys.time.len(),
            "dimension keys loaded"
        );
        Ok(keys)
    }
}

async fn name_map(
    pool: &PgPool,
    table: &'static str,
    name_column: &str,
    id_column: &str,
) -> Result<HashMap<String, i32>, FactLoadError> {
    let rows: Vec<(String, i32)> =
        sqlx::query_as(&format!("SELECT {}, {} FROM {}", name_column, id_column, table))
            .fetch_all(pool)
            .await
            .map_err(|source| FactLoadError::Lookup { table, source })?;
    Ok(rows.into_iter().collect())
}

/// A fully keyed fact ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub province_id: i32,
    pub procedure_id: i32,
    pub metric_id: i32,
    pub time_id: i32,
    pub result_value: Option<f64>,
    pub volume_cases: Option<i64>,
    pub quality_flag: QualityFlag,
    pub reporting_level: Option<String>,
    pub source_file: String,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub rows: Vec<FactRow>,
    pub failed: usize,
}

/// Resolve every record to its four keys. Rows missing any key are counted, never kept.
pub fn resolve_facts(
    records: &[CleanRecord],
    keys: &DimensionKeys,
    reference: &ReferenceData,
    source_file: &str,
) -> Resolution {
    let mut resolution = Resolution::default();

    for record in records {
        let metric = record.metric.as_deref();
        let resolved = (
            keys.provinces.get(&record.province),
            keys.procedures.get(&record.procedure),
            metric.and_then(|m| keys.metrics.get(m)),
            keys.time.get(&(record.year, ANNUAL_QUARTER)),
        );

        let (province_id, procedure_id, metric_id, time_id) = match resolved {
            (Some(p), Some(pr), Some(m), Some(t)) => (*p, *pr, *m, *t),
            _ => {
                resolution.failed += 1;
                if resolution.failed <= MAX_LOGGED_FAILURES {
                    warn!(
                        province = %record.province,
                        procedure = %record.procedure,
                        metric = ?record.metric,
                        year = record.year,
                        "fact row could not be resolved to dimension keys"
                    );
                }
                continue;
            }
        };

        let is_volume = metric.and_then(|m| reference.metric_type_of(m)) == Some(MetricType::Volume);
        let volume_cases = if is_volume {
            record.result.map(|v| v.round() as i64)
        } else {
            None
        };

        resolution.rows.push(FactRow {
            province_id,
            procedure_id,
            metric_id,
            time_id,
            result_value: record.result,
            volume_cases,
            quality_flag: record.quality_flag,
            reporting_level: record.reporting_level.clone(),
            source_file: source_file.to_string(),
        });
    }

    resolution
}

/// Configured batch size bounded so one INSERT stays under the bind-parameter limit.
pub fn effective_batch_size(configured: usize) -> usize {
    let ceiling = (POSTGRES_BIND_LIMIT / BIND_PARAMS_PER_ROW).min(MAX_ROWS_PER_INSERT);
    configured.clamp(1, ceiling)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FactLoadStats {
    pub inserted: usize,
    pub failed: usize,
    /// Inserted facts carrying a result value
    pub with_result: usize,
}

impl FactLoadStats {
    pub fn processed(&self) -> usize {
        self.inserted + self.failed
    }

    /// Share of inserted facts with a result, 0..=1
    pub fn completeness(&self) -> f64 {
        if self.inserted == 0 {
            0.0
        } else {
            self.with_result as f64 / self.inserted as f64
        }
    }
}

/// Resolve and replace the whole fact table in one transaction.
pub async fn load_facts(
    pool: &PgPool,
    records: &[CleanRecord],
    reference: &ReferenceData,
    source_file: &str,
    batch_size: usize,
) -> Result<FactLoadStats, FactLoadError> {
    let keys = DimensionKeys::load(pool).await?;
    let resolution = resolve_facts(records, &keys, reference, source_file);
    let batch_size = effective_batch_size(batch_size);

    let mut tx = pool.begin().await.map_err(FactLoadError::Write)?;

    sqlx::query(&format!("DELETE FROM {}", tables::FACTS))
        .execute(&mut *tx)
        .await
        .map_err(FactLoadError::Write)?;

    for (n, chunk) in resolution.rows.chunks(batch_size).enumerate() {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO fact_wait_times (province_id, procedure_id, metric_id, time_id, \
             result_value, volume_cases, data_quality_flag, reporting_level, source_file) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(row.province_id)
                .push_bind(row.procedure_id)
                .push_bind(row.metric_id)
                .push_bind(row.time_id)
                .push_bind(row.result_value)
                .push_bind(row.volume_cases)
                .push_bind(row.quality_flag.as_str())
                .push_bind(row.reporting_level.clone())
                .push_bind(row.source_file.clone());
        });
        qb.build()
            .execute(&mut *tx)
            .await
            .map_err(FactLoadError::Write)?;
        debug!(batch = n + 1, rows = chunk.len(), "fact batch inserted");
    }

    tx.commit().await.map_err(FactLoadError::Write)?;

    let stats = FactLoadStats {
        inserted: resolution.rows.len(),
        failed: resolution.failed,
        with_result: resolution
            .rows
            .iter()
            .filter(|r| r.result_value.is_some())
            .count(),
    };
    info!(
        inserted = stats.inserted,
        failed = stats.failed,
        batch_size,
        "fact table loaded"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> DimensionKeys {
        DimensionKeys {
            provinces: [("Ontario".to_string(), 1), ("Quebec".to_string(), 2)].into(),
            procedures: [("CABG".to_string(), 10)].into(),
            metrics: [
                ("50th Percentile".to_string(), 100),
                ("Volume".to_string(), 101),
            ]
            .into(),
            time: [((2019, 1), 1000), ((2019, 2), 1001), ((2020, 1), 1004)].into(),
        }
    }

    fn record(province: &str, metric: &str, year: i32, result: Option<f64>) -> CleanRecord {
        CleanRecord {
            reporting_level: Some("Provincial".to_string()),
            province: province.to_string(),
            region: None,
            procedure: "CABG".to_string(),
            metric: Some(metric.to_string()),
            year,
            unit: None,
            result,
            quality_flag: QualityFlag::for_result(result),
        }
    }

    #[test]
    fn test_resolution_uses_annual_quarter() {
        let reference = ReferenceData::default();
        let res = resolve_facts(
            &[record("Ontario", "50th Percentile", 2019, Some(12.0))],
            &keys(),
            &reference,
            "waits.xlsx",
        );
        assert_eq!(res.failed, 0);
        assert_eq!(res.rows.len(), 1);
        let row = &res.rows[0];
        assert_eq!(
            (row.province_id, row.procedure_id, row.metric_id, row.time_id),
            (1, 10, 100, 1000)
        );
        assert_eq!(row.volume_cases, None);
        assert_eq!(row.source_file, "waits.xlsx");
    }

    #[test]
    fn test_unresolved_rows_are_counted_and_skipped() {
        let reference = ReferenceData::default();
        let mut no_metric = record("Ontario", "Volume", 2019, Some(1.0));
        no_metric.metric = None;
        let res = resolve_facts(
            &[
                record("Manitoba", "Volume", 2019, Some(1.0)),
                record("Ontario", "Median", 2019, Some(1.0)),
                record("Ontario", "Volume", 2021, Some(1.0)),
                no_metric,
                record("Quebec", "Volume", 2020, Some(1.0)),
            ],
            &keys(),
            &reference,
            "waits.xlsx",
        );
        assert_eq!(res.failed, 4);
        assert_eq!(res.rows.len(), 1);
        assert_eq!(res.rows[0].province_id, 2);
    }

    #[test]
    fn test_volume_cases_only_for_volume_metric() {
        let reference = ReferenceData::default();
        let res = resolve_facts(
            &[
                record("Ontario", "Volume", 2019, Some(1234.6)),
                record("Ontario", "Volume", 2020, None),
                record("Ontario", "50th Percentile", 2020, Some(30.0)),
            ],
            &keys(),
            &reference,
            "waits.xlsx",
        );
        let volumes: Vec<_> = res.rows.iter().map(|r| r.volume_cases).collect();
        assert_eq!(volumes, vec![Some(1235), None, None]);
        assert_eq!(res.rows[1].quality_flag, QualityFlag::Missing);
    }

    #[test]
    fn test_batch_size_is_clamped() {
        assert_eq!(effective_batch_size(0), 1);
        assert_eq!(effective_batch_size(1000), 1000);
        assert_eq!(effective_batch_size(10_000), MAX_ROWS_PER_INSERT);
        assert!(MAX_ROWS_PER_INSERT * BIND_PARAMS_PER_ROW <= POSTGRES_BIND_LIMIT);
    }

    #[test]
    fn test_completeness_ratio() {
        let stats = FactLoadStats {
            inserted: 8,
            failed: 2,
            with_result: 6,
        };
        assert_eq!(stats.processed(), 10);
        assert!((stats.completeness() - 0.75).abs() < 1e-12);
        assert_eq!(FactLoadStats::default().completeness(), 0.0);
    }
}
