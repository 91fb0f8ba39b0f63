//! Schemas contributed by plugins.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::isolation::{TableRegistry, TableTraits};
use crate::schema::core_statements;

/// Plugin that owns the core tables; its schema lives in `public`
pub const CORE_PLUGIN: &str = "@elizaos/plugin-sql";

/// DDL and isolation descriptors contributed by one plugin.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSchema {
    /// Plugin identifier, e.g. `@elizaos/plugin-knowledge`
    pub plugin_name: String,
    /// Idempotent DDL, applied in order
    pub statements: Vec<String>,
    /// Descriptors for the tables the statements create
    #[serde(default)]
    pub tables: Vec<TableTraits>,
}

impl PluginSchema {
    pub fn new(plugin_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            statements: Vec::new(),
            tables: Vec::new(),
        }
    }

    /// The core tables every deployment carries
    pub fn core() -> Self {
        Self {
            plugin_name: CORE_PLUGIN.to_string(),
            statements: core_statements().into_iter().map(str::to_string).collect(),
            tables: TableRegistry::with_core_tables().iter().cloned().collect(),
        }
    }

    /// Append a DDL statement (builder pattern)
    pub fn statement(mut self, sql: impl Into<String>) -> Self {
        self.statements.push(sql.into());
        self
    }

    /// Describe a table for entity isolation (builder pattern)
    pub fn table(mut self, traits: TableTraits) -> Self {
        self.tables.push(traits);
        self
    }

    /// Hex sha256 over the statements; a change in any statement yields a new migration.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (i, statement) in self.statements.iter().enumerate() {
            if i > 0 {
                hasher.update(b"\n");
            }
            hasher.update(statement.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// JSON snapshot recorded alongside the migration
    pub fn snapshot(&self, schema_name: &str) -> Value {
        json!({
            "plugin": self.plugin_name,
            "schema": schema_name,
            "hash": self.hash(),
            "statements": self.statements,
            "tables": self.tables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hash_is_stable() {
        let a = PluginSchema::new("@test/plugin-a").statement("CREATE TABLE a (id uuid)");
        let b = PluginSchema::new("@test/plugin-b").statement("CREATE TABLE a (id uuid)");
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn test_hash_changes_with_statements() {
        let a = PluginSchema::new("@test/plugin-a").statement("CREATE TABLE a (id uuid)");
        let b = a.clone().statement("CREATE INDEX a_id ON a (id)");
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_statement_boundaries_matter() {
        let joined = PluginSchema::new("p").statement("ab");
        let split = PluginSchema::new("p").statement("a").statement("b");
        assert_ne!(joined.hash(), split.hash());
    }

    #[test]
    fn test_core_schema_describes_strict_tables() {
        let core = PluginSchema::core();
        assert_eq!(core.plugin_name, CORE_PLUGIN);
        assert!(!core.statements.is_empty());
        assert!(core
            .tables
            .iter()
            .any(|t| t.name == "memories" && t.strict));
    }

    #[test]
    fn test_snapshot_carries_hash_and_tables() {
        let schema = PluginSchema::new("@test/plugin-notes")
            .statement("CREATE TABLE IF NOT EXISTS notes (id uuid PRIMARY KEY, room_id uuid)")
            .table(TableTraits::new("notes").room("room_id"));
        let snapshot = schema.snapshot("notes");
        assert_eq!(snapshot["schema"], "notes");
        assert_eq!(snapshot["hash"], schema.hash());
        assert_eq!(snapshot["tables"].as_array().map(Vec::len), Some(1));
    }
}
