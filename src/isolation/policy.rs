//! SQL generation for the tenant and entity row-level policies.
//!
//! Everything here is pure string building over validated identifiers; the
//! installer in `postgres::isolation` executes it.

use std::fmt;

use uuid::Uuid;

use super::registry::{validate_identifier, EntityIsolation, TableTraits};
use crate::error::Result;
use crate::schema::table_names;

/// Session variable holding the tenant id
pub const SERVER_SETTING: &str = "app.server_id";
/// Session variable holding the requesting entity id
pub const ENTITY_SETTING: &str = "app.entity_id";
/// Tenant column added to every isolated table
pub const TENANT_COLUMN: &str = "server_id";
/// Name of the tenant policy
pub const TENANT_POLICY: &str = "server_isolation_policy";
/// Name of the entity policy
pub const ENTITY_POLICY: &str = "entity_isolation_policy";

/// Schema-qualified table
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedTable {
    /// Schema
    pub schema: String,
    /// Table
    pub name: String,
}

impl QualifiedTable {
    /// Validate both parts
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let table = Self {
            schema: schema.into(),
            name: name.into(),
        };
        validate_identifier(&table.schema)?;
        validate_identifier(&table.name)?;
        Ok(table)
    }

    /// Table in `public`
    pub fn public(name: impl Into<String>) -> Result<Self> {
        Self::new("public", name)
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\".\"{}\"", self.schema, self.name)
    }
}

/// Session functions read by every policy. Both return NULL when unset.
pub fn install_functions_sql() -> Vec<String> {
    vec![
        format!(
            r#"CREATE OR REPLACE FUNCTION current_server_id() RETURNS UUID AS $$
    SELECT NULLIF(current_setting('{SERVER_SETTING}', true), '')::uuid
$$ LANGUAGE sql STABLE"#
        ),
        format!(
            r#"CREATE OR REPLACE FUNCTION current_entity_id() RETURNS UUID AS $$
    SELECT NULLIF(current_setting('{ENTITY_SETTING}', true), '')::uuid
$$ LANGUAGE sql STABLE"#
        ),
    ]
}

/// Remove the session functions
pub fn drop_functions_sql() -> Vec<String> {
    vec![
        "DROP FUNCTION IF EXISTS current_entity_id()".to_string(),
        "DROP FUNCTION IF EXISTS current_server_id()".to_string(),
    ]
}

/// Tenant policy statements for one table, in execution order.
///
/// Row security is switched off while NULL tenant ids are backfilled so the
/// update sees every row. Rows that already carry a tenant id are never
/// rewritten.
pub fn tenant_policy_sql(table: &QualifiedTable, server_id: Uuid) -> Vec<String> {
    let index = format!("idx_{}_{}", table.name, TENANT_COLUMN);
    vec![
        format!("DROP POLICY IF EXISTS {TENANT_POLICY} ON {table}"),
        format!("ALTER TABLE {table} DISABLE ROW LEVEL SECURITY"),
        format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {TENANT_COLUMN} UUID DEFAULT current_server_id()"
        ),
        format!("ALTER TABLE {table} ALTER COLUMN {TENANT_COLUMN} SET DEFAULT current_server_id()"),
        format!("UPDATE {table} SET {TENANT_COLUMN} = '{server_id}'::uuid WHERE {TENANT_COLUMN} IS NULL"),
        format!("CREATE INDEX IF NOT EXISTS {index} ON {table} ({TENANT_COLUMN})"),
        format!("ALTER TABLE {table} ENABLE ROW LEVEL SECURITY"),
        format!("ALTER TABLE {table} FORCE ROW LEVEL SECURITY"),
        format!(
            "CREATE POLICY {TENANT_POLICY} ON {table} USING ({TENANT_COLUMN} = current_server_id()) WITH CHECK ({TENANT_COLUMN} = current_server_id())"
        ),
    ]
}

/// Row predicate for an isolation strategy, before strictness is applied.
pub fn entity_predicate(isolation: &EntityIsolation) -> Option<String> {
    let owned_by = |column: &Option<String>| {
        column
            .as_ref()
            .map(|c| format!(" OR {c} = current_entity_id()"))
            .unwrap_or_default()
    };

    match isolation {
        EntityIsolation::ParticipantSelf { column } | EntityIsolation::DirectOwnership { column } => {
            Some(format!("{column} = current_entity_id()"))
        }
        EntityIsolation::SharedRoom {
            room_column,
            entity_column,
        } => Some(format!(
            "{room_column} IN (SELECT room_id FROM {} WHERE entity_id = current_entity_id()){}",
            table_names::PARTICIPANTS,
            owned_by(entity_column)
        )),
        EntityIsolation::SharedChannel {
            channel_column,
            entity_column,
        } => Some(format!(
            "{channel_column} IN (SELECT channel_id FROM {} WHERE entity_id = current_entity_id()){}",
            table_names::CHANNEL_PARTICIPANTS,
            owned_by(entity_column)
        )),
        EntityIsolation::None => None,
    }
}

/// Predicate with strictness applied.
///
/// Strict tables show nothing without a bound entity; permissive tables treat
/// an unbound entity as a privileged caller.
pub fn guarded_predicate(isolation: &EntityIsolation, strict: bool) -> Option<String> {
    entity_predicate(isolation).map(|predicate| {
        if strict {
            format!("current_entity_id() IS NOT NULL AND ({predicate})")
        } else {
            format!("current_entity_id() IS NULL OR ({predicate})")
        }
    })
}

/// Entity policy statements for one table. Empty when the table has no
/// filterable column.
pub fn entity_policy_sql(table: &QualifiedTable, traits: &TableTraits) -> Vec<String> {
    let isolation = traits.isolation();
    let (Some(column), Some(predicate)) = (
        isolation.filter_column(),
        guarded_predicate(&isolation, traits.strict),
    ) else {
        return Vec::new();
    };

    let index = format!("idx_{}_{}_entity", table.name, column);
    vec![
        format!("DROP POLICY IF EXISTS {ENTITY_POLICY} ON {table}"),
        format!("CREATE INDEX IF NOT EXISTS {index} ON {table} ({column})"),
        format!(
            "CREATE POLICY {ENTITY_POLICY} ON {table} AS RESTRICTIVE USING ({predicate}) WITH CHECK ({predicate})"
        ),
    ]
}

/// Statements removing both policies from one table. Tenant columns and
/// their values are left in place.
pub fn uninstall_table_sql(table: &QualifiedTable) -> Vec<String> {
    vec![
        format!("DROP POLICY IF EXISTS {ENTITY_POLICY} ON {table}"),
        format!("DROP POLICY IF EXISTS {TENANT_POLICY} ON {table}"),
        format!("ALTER TABLE {table} NO FORCE ROW LEVEL SECURITY"),
        format!("ALTER TABLE {table} DISABLE ROW LEVEL SECURITY"),
        format!(
            "DO $$ BEGIN IF EXISTS (SELECT 1 FROM information_schema.columns WHERE table_schema = '{}' AND table_name = '{}' AND column_name = '{TENANT_COLUMN}') THEN ALTER TABLE {table} ALTER COLUMN {TENANT_COLUMN} DROP DEFAULT; END IF; END $$",
            table.schema, table.name
        ),
    ]
}

/// Bind both session variables for the current transaction only.
pub const BIND_CONTEXT_SQL: &str =
    "SELECT set_config('app.server_id', $1, true), set_config('app.entity_id', $2, true)";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::registry::TableRegistry;

    fn table(name: &str) -> QualifiedTable {
        QualifiedTable::public(name).unwrap()
    }

    #[test]
    fn test_tenant_policy_order_and_backfill() {
        let server = Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap();
        let sql = tenant_policy_sql(&table("memories"), server);

        let pos = |needle: &str| sql.iter().position(|s| s.contains(needle)).unwrap();
        assert!(pos("DROP POLICY") < pos("DISABLE ROW LEVEL SECURITY"));
        assert!(pos("DISABLE ROW LEVEL SECURITY") < pos("UPDATE"));
        assert!(pos("UPDATE") < pos("ENABLE ROW LEVEL SECURITY"));
        assert!(pos("ENABLE ROW LEVEL SECURITY") < pos("FORCE ROW LEVEL SECURITY"));
        assert!(pos("FORCE ROW LEVEL SECURITY") < pos("CREATE POLICY"));

        let backfill = &sql[pos("UPDATE")];
        assert_eq!(
            backfill,
            "UPDATE \"public\".\"memories\" SET server_id = '11111111-2222-3333-4444-555555555555'::uuid WHERE server_id IS NULL"
        );
        assert!(sql[pos("CREATE POLICY")].contains("WITH CHECK (server_id = current_server_id())"));
    }

    #[test]
    fn test_strict_and_permissive_predicates() {
        let registry = TableRegistry::with_core_tables();

        let memories = guarded_predicate(&registry.isolation_for("memories"), true).unwrap();
        assert_eq!(
            memories,
            "current_entity_id() IS NOT NULL AND (room_id IN (SELECT room_id FROM participants WHERE entity_id = current_entity_id()) OR entity_id = current_entity_id())"
        );

        let rooms = guarded_predicate(&registry.isolation_for("rooms"), false).unwrap();
        assert_eq!(
            rooms,
            "current_entity_id() IS NULL OR (id IN (SELECT room_id FROM participants WHERE entity_id = current_entity_id()))"
        );

        let participants = guarded_predicate(&registry.isolation_for("participants"), false).unwrap();
        assert_eq!(
            participants,
            "current_entity_id() IS NULL OR (entity_id = current_entity_id())"
        );
    }

    #[test]
    fn test_entity_policy_is_restrictive_and_indexed() {
        let registry = TableRegistry::with_core_tables();
        let traits = registry.get("logs").unwrap();
        let sql = entity_policy_sql(&table("logs"), traits);

        assert_eq!(sql.len(), 3);
        assert!(sql[1].contains("idx_logs_room_id_entity ON \"public\".\"logs\" (room_id)"));
        assert!(sql[2].contains("AS RESTRICTIVE"));
        assert!(sql[2].contains("current_entity_id() IS NOT NULL"));
    }

    #[test]
    fn test_unfiltered_table_gets_no_entity_policy() {
        let traits = TableTraits::new("entities");
        assert!(entity_policy_sql(&table("entities"), &traits).is_empty());
    }

    #[test]
    fn test_uninstall_keeps_tenant_column() {
        let sql = uninstall_table_sql(&table("rooms"));
        assert!(sql.iter().all(|s| !s.contains("DROP COLUMN")));
        assert!(sql.iter().any(|s| s.contains("DISABLE ROW LEVEL SECURITY")));
    }

    #[test]
    fn test_qualified_table_rejects_injection() {
        assert!(QualifiedTable::public("rooms\"; DROP TABLE agents; --").is_err());
        assert_eq!(table("rooms").to_string(), "\"public\".\"rooms\"");
    }
}
