use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use super::Config;

/// Postgres pool sized and timed from `config`.
pub async fn create_pool(database_url: &str, config: &Config) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(config.database_acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Validate the connection and apply pending migrations.
pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database connection validation failed: {}", e))?;

    sqlx::migrate!("./migrations").run(pool).await?;

    Ok(())
}
