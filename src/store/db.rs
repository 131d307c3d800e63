//! Pool lifecycle and the embedded migration runner.
//!
//! Migrations are paired `VERSION_*.up.sql` / `VERSION_*.down.sql` files
//! compiled into the binary and applied in lexical order against the
//! `_intelligence_migrations(version, applied_at)` ledger. Down files are
//! kept for operators; the runner only ever moves forward.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{error, info};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Embedded migrations in lexical (apply) order.
const MIGRATIONS: &[(&str, &str)] = &[
    ("0001", include_str!("../../migrations/0001_init.up.sql")),
    (
        "0002",
        include_str!("../../migrations/0002_hybrid_search.up.sql"),
    ),
];

/// Open the process-wide connection pool.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    info!(pool_size = config.pool_size, "creating database pool");
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;
    Ok(pool)
}

/// Apply pending migrations. Startup aborts on failure.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _intelligence_migrations (
            version VARCHAR(255) PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    let applied: Vec<String> = sqlx::query("SELECT version FROM _intelligence_migrations")
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|row| row.get::<String, _>("version"))
        .collect();

    let mut pending = 0;
    for &(version, sql) in MIGRATIONS {
        if applied.iter().any(|v| v == version) {
            continue;
        }
        info!(version, "applying migration");
        if let Err(e) = sqlx::query(sql).execute(&mut *tx).await {
            error!(version, error = %e, "migration failed");
            return Err(e.into());
        }
        sqlx::query("INSERT INTO _intelligence_migrations (version) VALUES ($1)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        pending += 1;
    }

    tx.commit().await?;
    info!(applied = pending, "migrations up to date");
    Ok(())
}

/// Liveness ping used by the readiness probe.
pub async fn health_check(pool: &PgPool) -> bool {
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => true,
        Err(e) => {
            error!("database health check failed: {e}");
            false
        }
    }
}

/// Close all pooled connections.
pub async fn close(pool: &PgPool) {
    info!("closing database pool");
    pool.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_in_lexical_order() {
        let versions: Vec<&str> = MIGRATIONS.iter().map(|(v, _)| *v).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn migration_sql_is_nonempty() {
        for (version, sql) in MIGRATIONS {
            assert!(!sql.trim().is_empty(), "migration {version} is empty");
        }
    }
}
