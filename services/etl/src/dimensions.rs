//! Dimension derivation and replace-all loading
//!
//! Rows are derived purely from the cleaned records plus the reference tables; the
//! writers then swap each table's contents inside its own transaction.

use crate::error::DimensionLoadError;
use crate::transform::CleanRecord;
use chrono::NaiveDate;
use common::config::{ReferenceData, NATIONAL_AGGREGATE};
use common::domain::{tables, MetricDefinition};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::BTreeSet;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct ProvinceRow {
    pub code: String,
    pub name: String,
    pub region: String,
    pub population: Option<i64>,
    pub is_territory: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureRow {
    pub code: String,
    pub name: String,
    pub category: String,
    pub priority: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimePeriodRow {
    pub fiscal_year: i32,
    pub calendar_year: i32,
    pub quarter: i16,
    pub year_quarter: String,
    pub is_current_year: bool,
    pub fiscal_year_start: NaiveDate,
    pub fiscal_year_end: NaiveDate,
}

/// Rows written per dimension
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DimensionCounts {
    pub provinces: usize,
    pub procedures: usize,
    pub metrics: usize,
    pub time_periods: usize,
}

// =============================================================================
// ROW DERIVATION
// =============================================================================

/// Observed provinces plus the national aggregate, sorted by name.
pub fn province_rows(records: &[CleanRecord], reference: &ReferenceData) -> Vec<ProvinceRow> {
    let names: BTreeSet<&str> = records
        .iter()
        .map(|r| r.province.as_str())
        .chain(std::iter::once(NATIONAL_AGGREGATE))
        .collect();

    names
        .into_iter()
        .map(|name| {
            let info = reference.province_info(name);
            ProvinceRow {
                code: info.code,
                name: name.to_string(),
                region: info.region,
                population: info.population,
                is_territory: info.is_territory,
            }
        })
        .collect()
}

pub fn procedure_rows(records: &[CleanRecord], reference: &ReferenceData) -> Vec<ProcedureRow> {
    let names: BTreeSet<&str> = records.iter().map(|r| r.procedure.as_str()).collect();
    names
        .into_iter()
        .map(|name| {
            let info = reference.procedure_info(name);
            ProcedureRow {
                code: info.code,
                name: name.to_string(),
                category: info.category,
                priority: info.priority,
            }
        })
        .collect()
}

/// The fixed metric set; source content does not matter.
pub fn metric_rows(reference: &ReferenceData) -> Vec<MetricDefinition> {
    reference.metrics.clone()
}

/// Four quarter rows per observed year, fiscal year April 1 to March 31.
pub fn time_period_rows(records: &[CleanRecord]) -> Vec<TimePeriodRow> {
    let years: BTreeSet<i32> = records.iter().map(|r| r.year).collect();
    let current = years.iter().next_back().copied();

    years
        .iter()
        .filter_map(|&year| {
            let start = NaiveDate::from_ymd_opt(year, 4, 1)?;
            let end = NaiveDate::from_ymd_opt(year + 1, 3, 31)?;
            Some((year, start, end))
        })
        .flat_map(|(year, start, end)| {
            (1..=4).map(move |quarter| TimePeriodRow {
                fiscal_year: year,
                calendar_year: year,
                quarter,
                year_quarter: format!("{}-Q{}", year, quarter),
                is_current_year: Some(year) == current,
                fiscal_year_start: start,
                fiscal_year_end: end,
            })
        })
        .collect()
}

// =============================================================================
// DATABASE WRITERS
// =============================================================================

fn failed(dimension: &'static str) -> impl Fn(sqlx::Error) -> DimensionLoadError {
    move |source| DimensionLoadError { dimension, source }
}

/// Replace all four dimensions, in dependency order. Stops at the first failure.
pub async fn load_dimensions(
    pool: &PgPool,
    records: &[CleanRecord],
    reference: &ReferenceData,
) -> Result<DimensionCounts, DimensionLoadError> {
    let counts = DimensionCounts {
        provinces: replace_provinces(pool, &province_rows(records, reference)).await?,
        procedures: replace_procedures(pool, &procedure_rows(records, reference)).await?,
        metrics: replace_metrics(pool, &metric_rows(reference)).await?,
        time_periods: replace_time_periods(pool, &time_period_rows(records)).await?,
    };
    info!(?counts, "dimensions loaded");
    Ok(counts)
}

pub async fn replace_provinces(
    pool: &PgPool,
    rows: &[ProvinceRow],
) -> Result<usize, DimensionLoadError> {
    let err = failed("provinces");
    let mut tx = pool.begin().await.map_err(&err)?;

    sqlx::query(&format!("DELETE FROM {}", tables::PROVINCES))
        .execute(&mut *tx)
        .await
        .map_err(&err)?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO dim_provinces (province_code, province_name, region, population_2023, is_territory)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&row.code)
        .bind(&row.name)
        .bind(&row.region)
        .bind(row.population)
        .bind(row.is_territory)
        .execute(&mut *tx)
        .await
        .map_err(&err)?;
    }

    tx.commit().await.map_err(&err)?;
    info!(rows = rows.len(), "replaced {}", tables::PROVINCES);
    Ok(rows.len())
}

pub async fn replace_procedures(
    pool: &PgPool,
    rows: &[ProcedureRow],
) -> Result<usize, DimensionLoadError> {
    let err = failed("procedures");
    let mut tx = pool.begin().await.map_err(&err)?;

    sqlx::query(&format!("DELETE FROM {}", tables::PROCEDURES))
        .execute(&mut *tx)
        .await
        .map_err(&err)?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO dim_procedures (procedure_code, procedure_name, procedure_category, clinical_priority)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&row.code)
        .bind(&row.name)
        .bind(&row.category)
        .bind(&row.priority)
        .execute(&mut *tx)
        .await
        .map_err(&err)?;
    }

    tx.commit().await.map_err(&err)?;
    info!(rows = rows.len(), "replaced {}", tables::PROCEDURES);
    Ok(rows.len())
}

pub async fn replace_metrics(
    pool: &PgPool,
    rows: &[MetricDefinition],
) -> Result<usize, DimensionLoadError> {
    let err = failed("metrics");
    let mut tx = pool.begin().await.map_err(&err)?;

    sqlx::query(&format!("DELETE FROM {}", tables::METRICS))
        .execute(&mut *tx)
        .await
        .map_err(&err)?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO dim_metrics (metric_code, metric_name, metric_type, unit_of_measurement, higher_is_better)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&row.code)
        .bind(&row.name)
        .bind(row.metric_type.as_str())
        .bind(&row.unit)
        .bind(row.higher_is_better)
        .execute(&mut *tx)
        .await
        .map_err(&err)?;
    }

    tx.commit().await.map_err(&err)?;
    info!(rows = rows.len(), "replaced {}", tables::METRICS);
    Ok(rows.len())
}

pub async fn replace_time_periods(
    pool: &PgPool,
    rows: &[TimePeriodRow],
) -> Result<usize, DimensionLoadError> {
    let err = failed("time_periods");
    let mut tx = pool.begin().await.map_err(&err)?;

    sqlx::query(&format!("DELETE FROM {}", tables::TIME_PERIODS))
        .execute(&mut *tx)
        .await
        .map_err(&err)?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO dim_time_periods (fiscal_year, calendar_year, quarter, year_quarter,
                                          is_current_year, fiscal_year_start_date, fiscal_year_end_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(row.fiscal_year)
        .bind(row.calendar_year)
        .bind(row.quarter)
        .bind(&row.year_quarter)
        .bind(row.is_current_year)
        .bind(row.fiscal_year_start)
        .bind(row.fiscal_year_end)
        .execute(&mut *tx)
        .await
        .map_err(&err)?;
    }

    tx.commit().await.map_err(&err)?;
    info!(rows = rows.len(), "replaced {}", tables::TIME_PERIODS);
    Ok(rows.len())
}
