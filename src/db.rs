//! SQLite connection setup and schema migrations.
//!
//! Migrations are versioned files under `migrations/`, embedded at compile time
//! and applied only when explicitly requested (`--migrate`), never on the
//! request path.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, time::Duration};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open a pool against `database_url`, creating the database file (and its
/// parent directory) if needed.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    if let Some(parent) = Path::new(options.get_filename()).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {:?}", parent))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", database_url))?;
    Ok(pool)
}

/// Apply all pending migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Running {} migrations...", MIGRATOR.iter().count());
    MIGRATOR
        .run(pool)
        .await
        .context("applying database migrations")?;
    Ok(())
}

/// Fail fast if the schema is behind the compiled-in migrations.
pub async fn ensure_migrated(pool: &SqlitePool) -> Result<()> {
    let latest = MIGRATOR.iter().map(|m| m.version).max().unwrap_or(0);
    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await
    .context("inspecting database schema")?;
    let applied: Option<i64> = if tracked == 0 {
        None
    } else {
        sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await
            .context("reading applied migrations")?
    };

    match applied {
        Some(version) if version >= latest => Ok(()),
        Some(version) => anyhow::bail!(
            "database schema is at version {} but {} is required; run with --migrate",
            version,
            latest
        ),
        None => anyhow::bail!("database has not been migrated; run with --migrate"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_apply_and_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta/test.db").display());
        let pool = connect(&url, 2).await.unwrap();

        assert!(ensure_migrated(&pool).await.is_err());
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
        ensure_migrated(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn query_failures_are_not_reported_as_unmigrated() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta/test.db").display());
        let pool = connect(&url, 2).await.unwrap();
        migrate(&pool).await.unwrap();
        pool.close().await;

        let err = ensure_migrated(&pool).await.unwrap_err();
        assert!(
            !format!("{:#}", err).contains("has not been migrated"),
            "{:#}",
            err
        );
    }
}
