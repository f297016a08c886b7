use crate::error::DbError;
use configuration::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::env;
use std::time::Duration;

/// Establishes a connection pool to the PostgreSQL database.
///
/// The URL comes from `[database].url`, falling back to `DATABASE_URL`
/// (loaded from `.env` when present). The pool is shared by every engine
/// instance in the process; each order borrows one connection for the
/// duration of its unit of work.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DbError> {
    // A missing .env file is fine; the variable may come from the environment.
    dotenvy::dotenv().ok();

    let database_url = match &config.url {
        Some(url) => url.clone(),
        None => env::var("DATABASE_URL").map_err(|_e| {
            DbError::ConnectionConfigError("DATABASE_URL must be set.".to_string())
        })?,
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&database_url)
        .await?;

    tracing::info!(max_connections = config.max_connections, "Connected to the ledger database.");
    Ok(pool)
}

/// Applies the embedded ledger schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    // Use a relative path from the crate root
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
