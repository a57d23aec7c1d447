//! Throwaway Postgres schema for database-backed tests.
//!
//! Enabled by the `test-support` feature; each service pulls it in as a
//! dev-dependency. Tests call `TestDb::connect()` and return early when
//! `TEST_DB_URL` is unset. Setup failures panic, as they would inside a test.

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Warehouse DDL split into executable statements.
pub fn schema_statements() -> impl Iterator<Item = &'static str> {
    SCHEMA_SQL.split(';').map(str::trim).filter(|s| !s.is_empty())
}

pub struct TestDb {
    pub pool: PgPool,
    admin: PgPool,
    schema: String,
}

impl TestDb {
    pub async fn connect() -> Option<TestDb> {
        let url = match std::env::var("TEST_DB_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("TEST_DB_URL not set, skipping database test");
                return None;
            }
        };

        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .expect("connect admin pool");

        let schema = format!("waittimes_test_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE SCHEMA {}", schema))
            .execute(&admin)
            .await
            .expect("create schema");

        let options = PgConnectOptions::from_str(&url)
            .expect("parse TEST_DB_URL")
            .options([("search_path", schema.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .expect("connect test pool");

        for statement in schema_statements() {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .expect("apply schema");
        }

        Some(TestDb {
            pool,
            admin,
            schema,
        })
    }

    pub async fn count(&self, sql: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(&self.pool)
            .await
            .unwrap_or_else(|e| panic!("{}: {}", sql, e))
    }

    pub async fn teardown(self) {
        self.pool.close().await;
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&self.admin)
            .await
            .expect("drop schema");
    }
}
