#![allow(missing_docs)]
//! Migration history tracking.

use anyhow::{Context, Result};
use sqlx::postgres::{PgExecutor, PgPool};
use std::sync::Arc;

/// Bookkeeping schema and tables, idempotent. Sent as one simple query, so
/// the lock holds until the last statement finishes.
pub(crate) const CREATE_TRACKING_TABLES: &str = r#"
SELECT pg_advisory_xact_lock(hashtext('migrations:bootstrap'));

CREATE SCHEMA IF NOT EXISTS migrations;

CREATE TABLE IF NOT EXISTS migrations._migrations (
    id SERIAL PRIMARY KEY,
    plugin_name TEXT NOT NULL,
    hash TEXT NOT NULL,
    created_at BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_migrations_plugin
    ON migrations._migrations (plugin_name, id DESC);

CREATE TABLE IF NOT EXISTS migrations._journal (
    plugin_name TEXT PRIMARY KEY,
    version TEXT NOT NULL,
    dialect TEXT NOT NULL,
    entries JSONB NOT NULL DEFAULT '[]'::jsonb
);

CREATE TABLE IF NOT EXISTS migrations._snapshots (
    id SERIAL PRIMARY KEY,
    plugin_name TEXT NOT NULL,
    idx INTEGER NOT NULL,
    snapshot JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (plugin_name, idx)
);
"#;

/// Row of `migrations._migrations`: id, hash, created_at (ms)
pub type MigrationEntry = (i32, String, i64);

/// Records which schema hash each plugin last applied.
pub struct MigrationTracker {
    pool: Arc<PgPool>,
}

impl MigrationTracker {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create the `migrations` schema and its tables.
    pub async fn ensure_tables(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_TRACKING_TABLES)
            .execute(self.pool.as_ref())
            .await
            .context("Failed to create migration tracking tables")?;
        Ok(())
    }

    pub async fn record_migration(&self, plugin_name: &str, hash: &str, created_at: i64) -> Result<()> {
        record_migration(self.pool.as_ref(), plugin_name, hash, created_at).await
    }

    /// Most recent migration for `plugin_name`
    pub async fn get_last_migration(&self, plugin_name: &str) -> Result<Option<MigrationEntry>> {
        last_migration(self.pool.as_ref(), plugin_name).await
    }

    /// Every migration for `plugin_name`, oldest first
    pub async fn get_history(&self, plugin_name: &str) -> Result<Vec<MigrationEntry>> {
        let rows = sqlx::query_as::<_, MigrationEntry>(
            "SELECT id, hash, created_at FROM migrations._migrations WHERE plugin_name = $1 ORDER BY id",
        )
        .bind(plugin_name)
        .fetch_all(self.pool.as_ref())
        .await
        .context("Failed to load migration history")?;
        Ok(rows)
    }
}

pub(crate) async fn record_migration<'e, E>(executor: E, plugin_name: &str, hash: &str, created_at: i64) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("INSERT INTO migrations._migrations (plugin_name, hash, created_at) VALUES ($1, $2, $3)")
        .bind(plugin_name)
        .bind(hash)
        .bind(created_at)
        .execute(executor)
        .await
        .with_context(|| format!("Failed to record migration for {}", plugin_name))?;
    Ok(())
}

pub(crate) async fn last_migration<'e, E>(executor: E, plugin_name: &str) -> Result<Option<MigrationEntry>>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, MigrationEntry>(
        r#"
        SELECT id, hash, created_at FROM migrations._migrations
        WHERE plugin_name = $1
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(plugin_name)
    .fetch_optional(executor)
    .await
    .context("Failed to load last migration")?;
    Ok(row)
}
