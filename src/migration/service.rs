#![allow(missing_docs)]
//! Applies plugin schemas once per content hash.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::postgres::{PgConnection, PgPool};
use std::sync::Arc;
use tracing::{debug, info};

use super::plugin::PluginSchema;
use super::schema_namespace::SchemaNamespaceManager;
use super::storage::{self, SnapshotStorage};
use super::tracker::{self, MigrationTracker};

const JOURNAL_VERSION: &str = "7";
const DIALECT: &str = "postgresql";

/// Result of migrating one plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Statements ran and the migration was recorded
    Applied,
    /// The recorded hash already matches
    Skipped,
}

/// Migration service coordinating schema namespaces, history, snapshots and journals.
pub struct MigrationService {
    pool: Arc<PgPool>,
    namespaces: SchemaNamespaceManager,
    tracker: MigrationTracker,
    snapshots: SnapshotStorage,
}

impl MigrationService {
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);
        Self {
            namespaces: SchemaNamespaceManager::new(pool.clone()),
            tracker: MigrationTracker::new(pool.clone()),
            snapshots: SnapshotStorage::new(pool.clone()),
            pool,
        }
    }

    /// Create the migration bookkeeping tables.
    pub async fn initialize(&self) -> Result<()> {
        self.tracker.ensure_tables().await?;
        debug!("Migration tables ready");
        Ok(())
    }

    /// Apply `schema` unless its hash was already recorded.
    ///
    /// Runs under a per-plugin advisory lock so concurrent boots apply a
    /// schema at most once; the statements and the bookkeeping rows commit
    /// together.
    pub async fn migrate(&self, schema: &PluginSchema) -> Result<MigrationOutcome> {
        self.initialize().await?;

        let plugin_name = schema.plugin_name.as_str();
        let schema_name = self.namespaces.ensure_plugin_schema(plugin_name).await?;
        let hash = schema.hash();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin migration transaction")?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("migrations:{}", plugin_name))
            .execute(&mut *tx)
            .await
            .context("Failed to acquire migration lock")?;

        if let Some((_, last_hash, _)) = tracker::last_migration(&mut *tx, plugin_name).await? {
            if last_hash == hash {
                tx.commit().await.context("Failed to release migration lock")?;
                debug!(plugin = plugin_name, %hash, "Schema up to date");
                return Ok(MigrationOutcome::Skipped);
            }
        }

        if schema_name != "public" {
            sqlx::query(&format!(r#"SET LOCAL search_path TO "{}", public"#, schema_name))
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to switch to schema {}", schema_name))?;
        }

        for (i, statement) in schema.statements.iter().enumerate() {
            sqlx::raw_sql(statement)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Statement {} of {} failed", i, plugin_name))?;
        }

        record(&mut tx, plugin_name, &hash, &schema.snapshot(&schema_name)).await?;
        tx.commit().await.context("Failed to commit migration")?;

        info!(
            plugin = plugin_name,
            schema = %schema_name,
            statements = schema.statements.len(),
            %hash,
            "Applied migration"
        );
        Ok(MigrationOutcome::Applied)
    }

    /// Migrate each schema in order, stopping at the first failure.
    pub async fn migrate_all(&self, schemas: &[PluginSchema]) -> Result<Vec<MigrationOutcome>> {
        let mut outcomes = Vec::with_capacity(schemas.len());
        for schema in schemas {
            outcomes.push(self.migrate(schema).await?);
        }
        Ok(outcomes)
    }

    /// Record a migration with its snapshot and journal entry.
    pub async fn record_migration(&self, plugin_name: &str, hash: &str, snapshot: &Value) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        record(&mut tx, plugin_name, hash, snapshot).await?;
        tx.commit().await.context("Failed to commit migration record")?;
        Ok(())
    }

    /// Migration status as `{pluginName, hasRun, lastHash, lastMigrationAt, snapshots}`
    pub async fn get_status(&self, plugin_name: &str) -> Result<Value> {
        let last = self.tracker.get_last_migration(plugin_name).await?;
        let snapshots = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM migrations._snapshots WHERE plugin_name = $1",
        )
        .bind(plugin_name)
        .fetch_one(self.pool.as_ref())
        .await
        .context("Failed to count snapshots")?;

        Ok(json!({
            "pluginName": plugin_name,
            "hasRun": last.is_some(),
            "lastHash": last.as_ref().map(|(_, hash, _)| hash.clone()),
            "lastMigrationAt": last.as_ref().map(|(_, _, created_at)| *created_at),
            "snapshots": snapshots,
        }))
    }

    pub async fn get_latest_snapshot(&self, plugin_name: &str) -> Result<Option<Value>> {
        self.snapshots.get_latest_snapshot(plugin_name).await
    }
}

async fn record(conn: &mut PgConnection, plugin_name: &str, hash: &str, snapshot: &Value) -> Result<()> {
    let now = Utc::now().timestamp_millis();
    tracker::record_migration(&mut *conn, plugin_name, hash, now).await?;

    let idx = storage::next_snapshot_idx(&mut *conn, plugin_name).await?;
    storage::save_snapshot(&mut *conn, plugin_name, idx, snapshot).await?;

    let mut entries = storage::load_journal(&mut *conn, plugin_name)
        .await?
        .and_then(|journal| journal.get("entries").and_then(Value::as_array).cloned())
        .unwrap_or_default();
    entries.push(journal_entry(idx, hash, now));
    storage::save_journal(&mut *conn, plugin_name, JOURNAL_VERSION, DIALECT, &Value::Array(entries)).await?;

    debug!(plugin_name, hash, idx, "Recorded migration");
    Ok(())
}

fn journal_entry(idx: i32, hash: &str, when: i64) -> Value {
    let tag = hash.get(..8).unwrap_or(hash);
    json!({
        "idx": idx,
        "version": format!("{:04}_{}", idx, tag),
        "when": when,
        "hash": hash,
        "breakpoints": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_journal_entry_tag() {
        let entry = journal_entry(3, "0123456789abcdef", 1_700_000_000_000);
        assert_eq!(entry["version"], "0003_01234567");
        assert_eq!(entry["idx"], 3);
    }

    #[test]
    fn test_journal_entry_short_hash() {
        let entry = journal_entry(0, "abc", 0);
        assert_eq!(entry["version"], "0000_abc");
    }
}
