//! Integration tests for migration service.

#![cfg(feature = "native")]

use elizaos_plugin_sql_isolation::isolation::TableTraits;
use elizaos_plugin_sql_isolation::migration::{
    JournalStorage, MigrationOutcome, MigrationService, MigrationTracker, PluginSchema,
    SchemaNamespaceManager, SnapshotStorage,
};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

/// Create a test database connection.
async fn create_test_pool() -> Result<sqlx::PgPool, sqlx::Error> {
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/eliza_test".to_string());

    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await
}

/// Clean up test data.
async fn cleanup_test_data(pool: &sqlx::PgPool, plugin_name: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM migrations._migrations WHERE plugin_name = $1")
        .bind(plugin_name)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM migrations._snapshots WHERE plugin_name = $1")
        .bind(plugin_name)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM migrations._journal WHERE plugin_name = $1")
        .bind(plugin_name)
        .execute(pool)
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_migration_service_initialization() {
    let pool = match create_test_pool().await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Skipping test - database not available: {}", e);
            return;
        }
    };

    let service = MigrationService::new(pool.clone());

    // Initialize should create migration tables
    let result = service.initialize().await;
    assert!(
        result.is_ok(),
        "Failed to initialize migration service: {:?}",
        result.err()
    );

    // And stay idempotent
    assert!(service.initialize().await.is_ok());

    pool.close().await;
}

#[tokio::test]
async fn test_record_migration() {
    let pool = match create_test_pool().await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Skipping test - database not available: {}", e);
            return;
        }
    };

    let service = MigrationService::new(pool.clone());
    service.initialize().await.unwrap();

    let plugin_name = "@test/migration-record-test";
    let _ = cleanup_test_data(&pool, plugin_name).await;

    let snapshot = json!({
        "plugin": plugin_name,
        "tables": [{"name": "notes", "room_column": "room_id"}]
    });

    let hash = "abcdef1234567890";
    let result = service.record_migration(plugin_name, hash, &snapshot).await;
    assert!(
        result.is_ok(),
        "Failed to record migration: {:?}",
        result.err()
    );

    let status = service.get_status(plugin_name).await.unwrap();
    assert!(status
        .get("hasRun")
        .and_then(|v| v.as_bool())
        .unwrap_or(false));
    assert_eq!(status.get("lastHash").and_then(|v| v.as_str()), Some(hash));
    assert_eq!(status.get("snapshots").and_then(|v| v.as_i64()), Some(1));

    cleanup_test_data(&pool, plugin_name).await.unwrap();
    pool.close().await;
}

#[tokio::test]
async fn test_migration_tracker() {
    let pool = match create_test_pool().await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Skipping test - database not available: {}", e);
            return;
        }
    };

    let pool_arc = Arc::new(pool.clone());
    let tracker = MigrationTracker::new(pool_arc);

    let result = tracker.ensure_tables().await;
    assert!(
        result.is_ok(),
        "Failed to ensure tables: {:?}",
        result.err()
    );

    let plugin_name = "@test/tracker-test";
    let _ = cleanup_test_data(&pool, plugin_name).await;

    let created_at = chrono::Utc::now().timestamp_millis();
    tracker
        .record_migration(plugin_name, "first_hash", created_at)
        .await
        .unwrap();
    tracker
        .record_migration(plugin_name, "second_hash", created_at + 1)
        .await
        .unwrap();

    let last = tracker.get_last_migration(plugin_name).await.unwrap();
    let (_, recorded_hash, recorded_at) = last.expect("migration recorded");
    assert_eq!(recorded_hash, "second_hash");
    assert_eq!(recorded_at, created_at + 1);

    let history = tracker.get_history(plugin_name).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].1, "first_hash");

    cleanup_test_data(&pool, plugin_name).await.unwrap();
    pool.close().await;
}

#[tokio::test]
async fn test_multiple_snapshots() {
    let pool = match create_test_pool().await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Skipping test - database not available: {}", e);
            return;
        }
    };

    let service = MigrationService::new(pool.clone());
    service.initialize().await.unwrap();

    let storage = SnapshotStorage::new(Arc::new(pool.clone()));

    let plugin_name = "@test/multi-snapshot-test";
    let _ = cleanup_test_data(&pool, plugin_name).await;

    assert_eq!(storage.get_next_idx(plugin_name).await.unwrap(), 0);

    for (idx, version) in ["1.0.0", "2.0.0-alpha", "3.0.0"].iter().enumerate() {
        storage
            .save_snapshot(plugin_name, idx as i32, &json!({ "version": version }))
            .await
            .unwrap();
    }

    let all = storage.get_all_snapshots(plugin_name).await.unwrap();
    assert_eq!(all.len(), 3);

    let latest = storage.get_latest_snapshot(plugin_name).await.unwrap();
    assert_eq!(
        latest.unwrap().get("version").and_then(|v| v.as_str()),
        Some("3.0.0")
    );

    assert_eq!(storage.get_next_idx(plugin_name).await.unwrap(), 3);

    // Saving at an existing index replaces it
    storage
        .save_snapshot(plugin_name, 2, &json!({"version": "3.0.1"}))
        .await
        .unwrap();
    assert_eq!(storage.get_all_snapshots(plugin_name).await.unwrap().len(), 3);

    cleanup_test_data(&pool, plugin_name).await.unwrap();
    pool.close().await;
}

#[tokio::test]
async fn test_journal_storage() {
    let pool = match create_test_pool().await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Skipping test - database not available: {}", e);
            return;
        }
    };

    let service = MigrationService::new(pool.clone());
    service.initialize().await.unwrap();

    let storage = JournalStorage::new(Arc::new(pool.clone()));

    let plugin_name = "@test/journal-test";
    let _ = cleanup_test_data(&pool, plugin_name).await;

    let entries = json!([
        {"idx": 0, "version": "0000_initial", "breakpoints": true}
    ]);

    let result = storage
        .save_journal(plugin_name, "0.0.1", "postgresql", &entries)
        .await;
    assert!(result.is_ok(), "Failed to save journal: {:?}", result.err());

    let j = storage.load_journal(plugin_name).await.unwrap().expect("journal");
    assert_eq!(j.get("version").and_then(|v| v.as_str()), Some("0.0.1"));
    assert_eq!(
        j.get("dialect").and_then(|v| v.as_str()),
        Some("postgresql")
    );
    assert_eq!(j.get("entries"), Some(&entries));

    cleanup_test_data(&pool, plugin_name).await.unwrap();
    pool.close().await;
}

#[tokio::test]
async fn test_migrate_applies_once_per_hash() {
    let pool = match create_test_pool().await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Skipping test - database not available: {}", e);
            return;
        }
    };

    let service = MigrationService::new(pool.clone());
    let plugin_name = "@test/plugin-notes";
    let _ = cleanup_test_data(&pool, plugin_name).await;
    sqlx::raw_sql("DROP SCHEMA IF EXISTS notes CASCADE")
        .execute(&pool)
        .await
        .unwrap();

    let schema = PluginSchema::new(plugin_name)
        .statement("CREATE TABLE IF NOT EXISTS notes (id UUID PRIMARY KEY, room_id UUID, body TEXT)")
        .table(TableTraits::new("notes").room("room_id"));

    assert_eq!(service.migrate(&schema).await.unwrap(), MigrationOutcome::Applied);
    assert_eq!(service.migrate(&schema).await.unwrap(), MigrationOutcome::Skipped);

    // The table lands in the plugin's own schema
    let namespaces = SchemaNamespaceManager::new(Arc::new(pool.clone()));
    assert!(namespaces.schema_exists("notes").await.unwrap());
    let in_schema: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = 'notes' AND table_name = 'notes')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(in_schema);

    // A changed statement list is a new migration
    let extended = schema
        .clone()
        .statement("CREATE INDEX IF NOT EXISTS idx_notes_room ON notes (room_id)");
    assert_eq!(service.migrate(&extended).await.unwrap(), MigrationOutcome::Applied);

    let snapshot = service.get_latest_snapshot(plugin_name).await.unwrap().expect("snapshot");
    assert_eq!(snapshot.get("hash").and_then(|v| v.as_str()), Some(extended.hash().as_str()));
    assert_eq!(snapshot.get("schema").and_then(|v| v.as_str()), Some("notes"));

    let journal = JournalStorage::new(Arc::new(pool.clone()))
        .load_journal(plugin_name)
        .await
        .unwrap()
        .expect("journal");
    assert_eq!(
        journal.get("entries").and_then(|v| v.as_array()).map(Vec::len),
        Some(2)
    );

    cleanup_test_data(&pool, plugin_name).await.unwrap();
    sqlx::raw_sql("DROP SCHEMA IF EXISTS notes CASCADE")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;
}

#[tokio::test]
async fn test_failed_statement_rolls_back() {
    let pool = match create_test_pool().await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Skipping test - database not available: {}", e);
            return;
        }
    };

    let service = MigrationService::new(pool.clone());
    let plugin_name = "@test/plugin-broken";
    let _ = cleanup_test_data(&pool, plugin_name).await;

    let schema = PluginSchema::new(plugin_name)
        .statement("CREATE TABLE IF NOT EXISTS half_done (id UUID PRIMARY KEY)")
        .statement("THIS IS NOT SQL");

    assert!(service.migrate(&schema).await.is_err());

    let status = service.get_status(plugin_name).await.unwrap();
    assert_eq!(status.get("hasRun").and_then(|v| v.as_bool()), Some(false));
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = 'broken' AND table_name = 'half_done')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(!exists);

    sqlx::raw_sql("DROP SCHEMA IF EXISTS broken CASCADE")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;
}

#[tokio::test]
async fn test_multiple_plugins() {
    let pool = match create_test_pool().await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Skipping test - database not available: {}", e);
            return;
        }
    };

    let service = MigrationService::new(pool.clone());
    service.initialize().await.unwrap();

    let plugin1 = "@test/plugin-one";
    let plugin2 = "@test/plugin-two";

    let _ = cleanup_test_data(&pool, plugin1).await;
    let _ = cleanup_test_data(&pool, plugin2).await;

    service
        .record_migration(plugin1, "hash1", &json!({"v": 1}))
        .await
        .unwrap();
    service
        .record_migration(plugin2, "hash2", &json!({"v": 2}))
        .await
        .unwrap();

    let status1 = service.get_status(plugin1).await.unwrap();
    let status2 = service.get_status(plugin2).await.unwrap();

    assert_eq!(status1.get("lastHash").and_then(|v| v.as_str()), Some("hash1"));
    assert_eq!(status2.get("lastHash").and_then(|v| v.as_str()), Some("hash2"));

    cleanup_test_data(&pool, plugin1).await.unwrap();
    cleanup_test_data(&pool, plugin2).await.unwrap();
    pool.close().await;
}

/// Schema name derivation through the public API
mod schema_namespacing {
    use elizaos_plugin_sql_isolation::migration::derive_schema_name;

    #[test]
    fn test_core_plugin_uses_public() {
        assert_eq!(derive_schema_name("@elizaos/plugin-sql"), "public");
    }

    #[test]
    fn test_scope_and_prefix_removed() {
        assert_eq!(derive_schema_name("@your-org/plugin-name"), "name");
        assert_eq!(derive_schema_name("@elizaos/plugin-bootstrap"), "bootstrap");
    }

    #[test]
    fn test_lowercase_conversion() {
        assert_eq!(derive_schema_name("myplugin"), "myplugin");
        assert_eq!(derive_schema_name("MyPlugin"), "myplugin");
    }

    #[test]
    fn test_numeric_in_name() {
        assert_eq!(derive_schema_name("@org/plugin-test123"), "test123");
        // "plugin2go" lacks the "plugin-" prefix
        assert_eq!(derive_schema_name("plugin2go"), "plugin2go");
        assert_eq!(derive_schema_name("plugin-2go"), "p_2go");
    }
}

/// Edge case tests
mod edge_cases {
    use super::*;

    #[tokio::test]
    async fn test_short_hash() {
        let pool = match create_test_pool().await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Skipping test - database not available: {}", e);
                return;
            }
        };

        let service = MigrationService::new(pool.clone());
        service.initialize().await.unwrap();

        let plugin_name = "@test/short-hash";
        let _ = cleanup_test_data(&pool, plugin_name).await;

        let result = service
            .record_migration(plugin_name, "abc", &json!({}))
            .await;
        assert!(result.is_ok(), "Should handle short hash without panicking");

        cleanup_test_data(&pool, plugin_name).await.unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_empty_snapshot() {
        let pool = match create_test_pool().await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Skipping test - database not available: {}", e);
                return;
            }
        };

        let service = MigrationService::new(pool.clone());
        service.initialize().await.unwrap();

        let plugin_name = "@test/empty-snapshot";
        let _ = cleanup_test_data(&pool, plugin_name).await;

        service
            .record_migration(plugin_name, "hash", &json!({}))
            .await
            .unwrap();

        let snapshot = service.get_latest_snapshot(plugin_name).await.unwrap();
        assert_eq!(snapshot, Some(json!({})));

        cleanup_test_data(&pool, plugin_name).await.unwrap();
        pool.close().await;
    }
}
