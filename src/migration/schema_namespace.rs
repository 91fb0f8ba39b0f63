#![allow(missing_docs)]
//! Schema namespace utilities for plugin isolation.

use anyhow::{Context, Result};
use regex::Regex;
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::debug;

use super::plugin::CORE_PLUGIN;

/// Reserved schema names that plugins cannot use.
const RESERVED_SCHEMAS: &[&str] = &["public", "pg_catalog", "information_schema", "migrations"];

/// npm scope followed by an optional `plugin-` prefix
const SCOPE_AND_PREFIX: &str = r"^(?:@[^/]+/)?(?:plugin-)?";

/// Derive a database schema name from a plugin name.
///
/// - the core plugin uses the `public` schema
/// - other plugins drop their npm scope and `plugin-` prefix, then normalize
///
/// # Arguments
/// * `plugin_name` - Plugin identifier (e.g., '@your-org/plugin-name')
///
/// # Returns
/// Database schema name (e.g., 'name' for '@your-org/plugin-name')
pub fn derive_schema_name(plugin_name: &str) -> String {
    if plugin_name == CORE_PLUGIN {
        return "public".to_string();
    }

    let stripped = match Regex::new(SCOPE_AND_PREFIX) {
        Ok(re) => re.replace(plugin_name, "").into_owned(),
        Err(_) => plugin_name.to_string(),
    };

    let mut schema_name = normalize_schema_name(&stripped.to_lowercase());

    if schema_name.is_empty() || RESERVED_SCHEMAS.contains(&schema_name.as_str()) {
        schema_name = format!(
            "plugin_{}",
            normalize_schema_name(&plugin_name.to_lowercase())
        );
    }

    // PostgreSQL identifiers must start with a letter
    if !schema_name
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic())
    {
        schema_name = format!("p_{}", schema_name);
    }

    if schema_name.len() > 63 {
        schema_name.truncate(63);
    }

    schema_name
}

/// Collapse every run of non-alphanumeric characters into one underscore
/// and trim underscores from both ends.
fn normalize_schema_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_was_underscore = false;

    for c in input.chars() {
        if c.is_alphanumeric() {
            out.push(c);
            prev_was_underscore = false;
        } else if !prev_was_underscore {
            out.push('_');
            prev_was_underscore = true;
        }
    }

    out.trim_matches('_').to_string()
}

/// Whether `schema_name` is safe to splice into DDL as a quoted identifier
pub fn is_valid_schema_name(schema_name: &str) -> bool {
    !schema_name.is_empty()
        && schema_name.len() <= 63
        && schema_name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Schema namespace manager for plugin isolation.
pub struct SchemaNamespaceManager {
    pool: Arc<PgPool>,
}

impl SchemaNamespaceManager {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Ensure a database schema exists.
    ///
    /// # Errors
    /// Returns error if schema name is invalid or creation fails
    pub async fn ensure_schema_exists(&self, schema_name: &str) -> Result<()> {
        if schema_name == "public" {
            return Ok(());
        }

        if !is_valid_schema_name(schema_name) {
            anyhow::bail!("Invalid schema name: {}", schema_name);
        }

        let query = format!(r#"CREATE SCHEMA IF NOT EXISTS "{}""#, schema_name);
        sqlx::query(&query)
            .execute(self.pool.as_ref())
            .await
            .with_context(|| format!("Failed to create schema {}", schema_name))?;

        debug!(schema_name, "Ensured schema exists");
        Ok(())
    }

    /// Ensure the schema for a plugin exists and return its name.
    pub async fn ensure_plugin_schema(&self, plugin_name: &str) -> Result<String> {
        let schema_name = derive_schema_name(plugin_name);
        self.ensure_schema_exists(&schema_name).await?;
        Ok(schema_name)
    }

    pub async fn schema_exists(&self, schema_name: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.schemata
                WHERE schema_name = $1
            )
            "#,
        )
        .bind(schema_name)
        .fetch_one(self.pool.as_ref())
        .await
        .context("Failed to check schema existence")?;

        Ok(exists)
    }

    /// List all plugin schemas (excluding system schemas).
    pub async fn list_plugin_schemas(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT schema_name::text
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('public', 'information_schema', 'pg_catalog', 'pg_toast', 'migrations')
            AND schema_name NOT LIKE 'pg_%'
            ORDER BY schema_name
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await
        .context("Failed to list schemas")?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_plugin_uses_public() {
        assert_eq!(derive_schema_name(CORE_PLUGIN), "public");
    }

    #[test]
    fn test_scope_and_prefix_removed() {
        assert_eq!(derive_schema_name("@your-org/plugin-name"), "name");
        assert_eq!(derive_schema_name("@elizaos/plugin-knowledge"), "knowledge");
    }

    #[test]
    fn test_simple_names() {
        assert_eq!(derive_schema_name("my-plugin"), "my_plugin");
        assert_eq!(derive_schema_name("plugin-test"), "test");
    }

    #[test]
    fn test_special_characters_normalized() {
        assert_eq!(derive_schema_name("@org/plugin.name!"), "plugin_name");
        assert_eq!(derive_schema_name("123plugin"), "p_123plugin");
    }

    #[test]
    fn test_lowercase_conversion() {
        assert_eq!(derive_schema_name("@MyOrg/MyPlugin"), "myplugin");
        assert_eq!(derive_schema_name("@MyOrg/plugin-MyPlugin"), "myplugin");
    }

    #[test]
    fn test_reserved_names_handled() {
        assert_eq!(
            derive_schema_name("@org/plugin-public"),
            "plugin_org_plugin_public"
        );
        assert_eq!(derive_schema_name("@org/plugin-migrations"), "plugin_org_plugin_migrations");
    }

    #[test]
    fn test_empty_after_strip() {
        assert_eq!(derive_schema_name("@org/plugin-"), "plugin_org_plugin");
    }

    #[test]
    fn test_long_names_truncated() {
        let name = format!("@org/plugin-{}", "a".repeat(100));
        assert_eq!(derive_schema_name(&name).len(), 63);
    }

    #[test]
    fn test_schema_name_validation() {
        assert!(is_valid_schema_name("knowledge_v2"));
        assert!(!is_valid_schema_name("bad\"name"));
        assert!(!is_valid_schema_name(""));
    }
}
