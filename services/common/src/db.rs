use crate::config::DatabaseSettings;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Open the Postgres pool described by `settings`.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    tracing::debug!(max_connections = settings.max_connections, "connecting to database");
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.url)
        .await
}
