//! Installs, removes and inspects the row-level isolation policies.

use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::isolation::policy::{
    drop_functions_sql, entity_policy_sql, install_functions_sql, tenant_policy_sql,
    uninstall_table_sql, QualifiedTable, ENTITY_POLICY, TENANT_POLICY,
};
use crate::isolation::registry::{TableRegistry, EXCLUDED_TABLES};
use crate::isolation::{PolicyReport, TableIsolationStatus};
use crate::schema::server::{CREATE_SERVERS_TABLE, UPSERT_SERVER};

/// Applies the tenant and entity policies across the working schemas
pub struct PolicyInstaller {
    pool: PgPool,
    server_id: Uuid,
    registry: TableRegistry,
}

impl PolicyInstaller {
    pub fn new(pool: PgPool, server_id: Uuid, registry: TableRegistry) -> Self {
        Self {
            pool,
            server_id,
            registry,
        }
    }

    /// Register this tenant in the `servers` table
    pub async fn ensure_server(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_SERVERS_TABLE).execute(&self.pool).await?;
        sqlx::query(UPSERT_SERVER)
            .bind(self.server_id)
            .execute(&self.pool)
            .await?;
        debug!(server_id = %self.server_id, "Registered server");
        Ok(())
    }

    /// Install the session functions and apply both policies to every table.
    ///
    /// Idempotent. A table that fails is logged and skipped; only failure to
    /// create the session functions aborts the pass.
    pub async fn install(&self) -> Result<PolicyReport> {
        for statement in install_functions_sql() {
            sqlx::raw_sql(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Policy {
                    table: "*".to_string(),
                    reason: e.to_string(),
                })?;
        }
        self.ensure_server().await?;

        let mut report = PolicyReport::default();
        for (schema, name) in self.list_tables().await? {
            let label = format!("{schema}.{name}");
            match self.apply_table(&schema, &name).await {
                Ok(with_entity_policy) => {
                    info!(table = %label, entity_policy = with_entity_policy, "Isolation applied");
                    report.applied.push(label);
                }
                Err(e) => {
                    warn!(table = %label, error = %e, "Failed to apply isolation, skipping table");
                    report.failed.push((label, e.to_string()));
                }
            }
        }

        info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            "Isolation install finished"
        );
        Ok(report)
    }

    /// Returns whether an entity policy was installed
    async fn apply_table(&self, schema: &str, name: &str) -> Result<bool> {
        let table = QualifiedTable::new(schema, name)?;
        let mut statements = tenant_policy_sql(&table, self.server_id);
        let entity_statements = self
            .registry
            .get(name)
            .map(|traits| entity_policy_sql(&table, traits))
            .unwrap_or_default();
        let with_entity_policy = !entity_statements.is_empty();
        statements.extend(entity_statements);

        let mut tx = self.pool.begin().await?;
        for statement in &statements {
            sqlx::raw_sql(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Policy {
                    table: table.to_string(),
                    reason: e.to_string(),
                })?;
        }
        tx.commit().await?;
        Ok(with_entity_policy)
    }

    /// Remove every generated policy and the session functions.
    ///
    /// `server_id` columns and their values stay; only the `servers`
    /// registry is cleared. Re-installing later backfills NULL tenant ids
    /// only, so rows written by other tenants keep their owner.
    pub async fn uninstall(&self) -> Result<PolicyReport> {
        let mut report = PolicyReport::default();
        for (schema, name) in self.list_tables().await? {
            let label = format!("{schema}.{name}");
            match self.remove_table(&schema, &name).await {
                Ok(()) => report.applied.push(label),
                Err(e) => {
                    warn!(table = %label, error = %e, "Failed to remove isolation, skipping table");
                    report.failed.push((label, e.to_string()));
                }
            }
        }

        for statement in drop_functions_sql() {
            sqlx::raw_sql(&statement).execute(&self.pool).await?;
        }
        sqlx::raw_sql("DELETE FROM servers").execute(&self.pool).await?;

        info!(tables = report.applied.len(), "Isolation uninstalled");
        Ok(report)
    }

    async fn remove_table(&self, schema: &str, name: &str) -> Result<()> {
        let table = QualifiedTable::new(schema, name)?;
        let mut tx = self.pool.begin().await?;
        for statement in uninstall_table_sql(&table) {
            sqlx::raw_sql(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Policy {
                    table: table.to_string(),
                    reason: e.to_string(),
                })?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Row-level security state of every table in the working schemas
    pub async fn status(&self) -> Result<Vec<TableIsolationStatus>> {
        let rows = sqlx::query(
            r#"
            SELECT n.nspname::text AS schema_name,
                   c.relname::text AS table_name,
                   c.relrowsecurity AS rls_enabled,
                   c.relforcerowsecurity AS rls_forced,
                   EXISTS (
                       SELECT 1 FROM pg_policies p
                       WHERE p.schemaname = n.nspname AND p.tablename = c.relname AND p.policyname = $1
                   ) AS tenant_policy,
                   EXISTS (
                       SELECT 1 FROM pg_policies p
                       WHERE p.schemaname = n.nspname AND p.tablename = c.relname AND p.policyname = $2
                   ) AS entity_policy
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind = 'r'
              AND n.nspname NOT IN ('pg_catalog', 'information_schema', 'migrations')
              AND n.nspname NOT LIKE 'pg_%'
            ORDER BY 1, 2
            "#,
        )
        .bind(TENANT_POLICY)
        .bind(ENTITY_POLICY)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let schema: String = r.get("schema_name");
                let name: String = r.get("table_name");
                TableIsolationStatus {
                    table: format!("{schema}.{name}"),
                    rls_enabled: r.get("rls_enabled"),
                    rls_forced: r.get("rls_forced"),
                    tenant_policy: r.get("tenant_policy"),
                    entity_policy: r.get("entity_policy"),
                }
            })
            .collect())
    }

    async fn list_tables(&self) -> Result<Vec<(String, String)>> {
        let excluded: Vec<String> = EXCLUDED_TABLES.iter().map(|t| t.to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT table_schema::text AS table_schema, table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_type = 'BASE TABLE'
              AND table_schema NOT IN ('pg_catalog', 'information_schema', 'migrations')
              AND table_schema NOT LIKE 'pg_%'
              AND NOT (table_name = ANY($1))
            ORDER BY table_schema, table_name
            "#,
        )
        .bind(&excluded)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("table_schema"), r.get("table_name")))
            .collect())
    }
}
