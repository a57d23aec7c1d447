//! Snapshot and checks against a real Postgres schema. Skipped without TEST_DB_URL.

use common::test_support::TestDb;
use common::Settings;
use quality::{run_checks, CheckStatus, Snapshot};

async fn seed(db: &TestDb) {
    let statements = [
        "INSERT INTO dim_provinces (province_id, province_code, province_name) VALUES (1, 'ON', 'Ontario'), (2, 'QC', 'Quebec')",
        "INSERT INTO dim_procedures (procedure_id, procedure_code, procedure_name) VALUES (1, 'CABG', 'CABG'), (2, 'MRI_SCAN', 'MRI Scan')",
        "INSERT INTO dim_metrics (metric_id, metric_code, metric_name, metric_type) VALUES (1, 'PCT_50', '50th Percentile', 'Percentile')",
        "INSERT INTO dim_time_periods (time_id, fiscal_year, calendar_year, quarter, year_quarter, is_current_year, \
         fiscal_year_start_date, fiscal_year_end_date) VALUES \
         (1, 2019, 2019, 1, '2019-Q1', false, '2019-04-01', '2020-03-31'), \
         (2, 2020, 2020, 1, '2020-Q1', false, '2020-04-01', '2021-03-31')",
        "INSERT INTO fact_wait_times (province_id, procedure_id, metric_id, time_id, result_value, data_quality_flag) VALUES \
         (1, 1, 1, 1, 10.0, 'VALID'), (1, 1, 1, 2, 12.0, 'VALID'), (2, 1, 1, 1, 15.0, 'VALID'), (2, 1, 1, 2, NULL, 'MISSING')",
    ];
    for sql in statements {
        sqlx::query(sql).execute(&db.pool).await.expect(sql);
    }
}

#[tokio::test]
async fn test_missing_audit_table_fails_only_dependent_checks() {
    let Some(db) = TestDb::connect().await else { return };
    seed(&db).await;
    sqlx::query("DROP TABLE audit_data_loads")
        .execute(&db.pool)
        .await
        .unwrap();

    let snapshot = Snapshot::load(&db.pool).await.unwrap();
    assert_eq!(snapshot.tables.len(), 5);
    assert_eq!(snapshot.row_counts.get("fact_wait_times"), Some(&4));
    assert!(snapshot.latest_load.is_err());

    let report = run_checks(&snapshot, &Settings::default(), "test");
    let status = |name: &str| report.outcome(name).map(|o| o.status);

    assert_eq!(status("Database Schema Validation"), Some(CheckStatus::Failed));
    assert_eq!(status("Load Overview"), Some(CheckStatus::Failed));
    assert_eq!(status("Referential Integrity"), Some(CheckStatus::Passed));
    assert_eq!(status("Data Completeness"), Some(CheckStatus::Passed));
    assert_eq!(status("Procedure Data Validation"), Some(CheckStatus::Passed));
    assert!(report
        .critical_issues
        .contains(&"Database Schema Validation: Missing tables: audit_data_loads".to_string()));

    let procedures = report
        .outcome("Procedure Data Validation")
        .and_then(|o| o.result.clone())
        .unwrap();
    assert_eq!(procedures["unused_procedure_list"], serde_json::json!(["MRI Scan"]));

    db.teardown().await;
}
