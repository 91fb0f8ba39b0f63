#![allow(missing_docs)]
//! Snapshot and journal storage for applied plugin schemas.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sqlx::postgres::{PgExecutor, PgPool};
use std::sync::Arc;

/// Numbered schema snapshots per plugin.
pub struct SnapshotStorage {
    pool: Arc<PgPool>,
}

impl SnapshotStorage {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Store `snapshot` at `idx`, replacing any snapshot already there.
    pub async fn save_snapshot(&self, plugin_name: &str, idx: i32, snapshot: &Value) -> Result<()> {
        save_snapshot(self.pool.as_ref(), plugin_name, idx, snapshot).await
    }

    pub async fn get_latest_snapshot(&self, plugin_name: &str) -> Result<Option<Value>> {
        let snapshot = sqlx::query_scalar::<_, Value>(
            r#"
            SELECT snapshot FROM migrations._snapshots
            WHERE plugin_name = $1
            ORDER BY idx DESC
            LIMIT 1
            "#,
        )
        .bind(plugin_name)
        .fetch_optional(self.pool.as_ref())
        .await
        .context("Failed to load latest snapshot")?;
        Ok(snapshot)
    }

    /// Every snapshot for `plugin_name`, lowest index first
    pub async fn get_all_snapshots(&self, plugin_name: &str) -> Result<Vec<Value>> {
        let snapshots = sqlx::query_scalar::<_, Value>(
            "SELECT snapshot FROM migrations._snapshots WHERE plugin_name = $1 ORDER BY idx",
        )
        .bind(plugin_name)
        .fetch_all(self.pool.as_ref())
        .await
        .context("Failed to load snapshots")?;
        Ok(snapshots)
    }

    pub async fn get_next_idx(&self, plugin_name: &str) -> Result<i32> {
        next_snapshot_idx(self.pool.as_ref(), plugin_name).await
    }
}

pub(crate) async fn save_snapshot<'e, E>(executor: E, plugin_name: &str, idx: i32, snapshot: &Value) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO migrations._snapshots (plugin_name, idx, snapshot)
        VALUES ($1, $2, $3)
        ON CONFLICT (plugin_name, idx)
        DO UPDATE SET snapshot = EXCLUDED.snapshot, created_at = now()
        "#,
    )
    .bind(plugin_name)
    .bind(idx)
    .bind(snapshot)
    .execute(executor)
    .await
    .with_context(|| format!("Failed to save snapshot {} for {}", idx, plugin_name))?;
    Ok(())
}

pub(crate) async fn next_snapshot_idx<'e, E>(executor: E, plugin_name: &str) -> Result<i32>
where
    E: PgExecutor<'e>,
{
    let next = sqlx::query_scalar::<_, i32>(
        "SELECT COALESCE(MAX(idx) + 1, 0) FROM migrations._snapshots WHERE plugin_name = $1",
    )
    .bind(plugin_name)
    .fetch_one(executor)
    .await
    .context("Failed to compute next snapshot index")?;
    Ok(next)
}

/// Journal of applied migrations per plugin.
pub struct JournalStorage {
    pool: Arc<PgPool>,
}

impl JournalStorage {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn save_journal(&self, plugin_name: &str, version: &str, dialect: &str, entries: &Value) -> Result<()> {
        save_journal(self.pool.as_ref(), plugin_name, version, dialect, entries).await
    }

    /// Journal as `{version, dialect, entries}`
    pub async fn load_journal(&self, plugin_name: &str) -> Result<Option<Value>> {
        load_journal(self.pool.as_ref(), plugin_name).await
    }
}

pub(crate) async fn save_journal<'e, E>(
    executor: E,
    plugin_name: &str,
    version: &str,
    dialect: &str,
    entries: &Value,
) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO migrations._journal (plugin_name, version, dialect, entries)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (plugin_name)
        DO UPDATE SET version = EXCLUDED.version, dialect = EXCLUDED.dialect, entries = EXCLUDED.entries
        "#,
    )
    .bind(plugin_name)
    .bind(version)
    .bind(dialect)
    .bind(entries)
    .execute(executor)
    .await
    .with_context(|| format!("Failed to save journal for {}", plugin_name))?;
    Ok(())
}

pub(crate) async fn load_journal<'e, E>(executor: E, plugin_name: &str) -> Result<Option<Value>>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, (String, String, Value)>(
        "SELECT version, dialect, entries FROM migrations._journal WHERE plugin_name = $1",
    )
    .bind(plugin_name)
    .fetch_optional(executor)
    .await
    .context("Failed to load journal")?;

    Ok(row.map(|(version, dialect, entries)| {
        json!({
            "version": version,
            "dialect": dialect,
            "entries": entries,
        })
    }))
}
