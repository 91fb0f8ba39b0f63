//! PostgreSQL adapter: owns the pool, migrates, installs isolation and hands
//! out stores bound to an isolation scope.

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::isolation::{PolicyReport, TableIsolationStatus, TableRegistry};
use crate::migration::{MigrationOutcome, MigrationService, PluginSchema};

use super::context::StoreContext;
use super::isolation::PolicyInstaller;
use super::stores::{
    PgAgentStore, PgCacheStore, PgEntityStore, PgLogStore, PgMemoryStore, PgMessagingStore,
    PgRelationshipStore, PgRoomStore, PgTaskStore,
};
use super::PostgresConnectionManager;

/// Stores sharing one isolation scope
#[derive(Clone)]
pub struct Stores {
    ctx: StoreContext,
}

impl Stores {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }

    /// Entity bound by these stores, `None` for the system scope
    pub fn entity_id(&self) -> Option<Uuid> {
        self.ctx.entity_id()
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    pub fn agents(&self) -> PgAgentStore {
        PgAgentStore::new(self.ctx.clone())
    }

    pub fn entities(&self) -> PgEntityStore {
        PgEntityStore::new(self.ctx.clone())
    }

    pub fn rooms(&self) -> PgRoomStore {
        PgRoomStore::new(self.ctx.clone())
    }

    pub fn relationships(&self) -> PgRelationshipStore {
        PgRelationshipStore::new(self.ctx.clone())
    }

    pub fn memories(&self) -> PgMemoryStore {
        PgMemoryStore::new(self.ctx.clone())
    }

    pub fn tasks(&self) -> PgTaskStore {
        PgTaskStore::new(self.ctx.clone())
    }

    pub fn logs(&self) -> PgLogStore {
        PgLogStore::new(self.ctx.clone())
    }

    pub fn cache(&self) -> PgCacheStore {
        PgCacheStore::new(self.ctx.clone())
    }

    pub fn messaging(&self) -> PgMessagingStore {
        PgMessagingStore::new(self.ctx.clone())
    }
}

/// PostgreSQL database adapter
pub struct PostgresAdapter {
    manager: PostgresConnectionManager,
    config: StoreConfig,
    registry: TableRegistry,
    plugins: Vec<PluginSchema>,
    stores: Stores,
}

impl PostgresAdapter {
    /// Validate `config` and connect
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let manager = PostgresConnectionManager::new(&config).await?;
        Ok(Self::with_manager(manager, config))
    }

    /// Build on an already connected manager
    pub fn with_manager(manager: PostgresConnectionManager, config: StoreConfig) -> Self {
        let ctx = StoreContext::new(manager.get_pool().clone(), &config);
        PostgresAdapter {
            manager,
            config,
            registry: TableRegistry::with_core_tables(),
            plugins: Vec::new(),
            stores: Stores::new(ctx),
        }
    }

    /// Add a plugin schema. Its table descriptors join the isolation
    /// registry; the statements run on the next [`PostgresAdapter::init`].
    pub fn with_plugin(mut self, schema: PluginSchema) -> Result<Self> {
        for traits in &schema.tables {
            self.registry.register(traits.clone())?;
        }
        self.plugins.push(schema);
        Ok(self)
    }

    /// Apply pending migrations, then install isolation when enabled.
    pub async fn init(&self) -> Result<Vec<MigrationOutcome>> {
        let service = MigrationService::new(self.manager.get_pool().clone());
        let mut schemas = Vec::with_capacity(self.plugins.len() + 1);
        schemas.push(PluginSchema::core());
        schemas.extend(self.plugins.iter().cloned());
        let outcomes = service.migrate_all(&schemas).await?;

        if self.config.data_isolation {
            let report = self.install_isolation().await?;
            if !report.is_clean() {
                warn!(
                    failed = report.failed.len(),
                    "Some tables were left without isolation"
                );
            }
        } else {
            self.installer().ensure_server().await?;
        }

        info!(
            server_id = %self.config.server_id,
            isolation = self.config.data_isolation,
            plugins = schemas.len(),
            "Database initialized"
        );
        Ok(outcomes)
    }

    /// Install tenant and entity policies on every table. Safe on every boot.
    pub async fn install_isolation(&self) -> Result<PolicyReport> {
        self.installer().install().await
    }

    /// Remove every policy. Tenant ids stay on the rows.
    pub async fn uninstall_isolation(&self) -> Result<PolicyReport> {
        self.installer().uninstall().await
    }

    pub async fn isolation_status(&self) -> Result<Vec<TableIsolationStatus>> {
        self.installer().status().await
    }

    fn installer(&self) -> PolicyInstaller {
        PolicyInstaller::new(
            self.manager.get_pool().clone(),
            self.config.server_id,
            self.registry.clone(),
        )
    }

    /// Stores for privileged callers
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Stores whose transactions are bound to `entity_id`
    pub fn for_entity(&self, entity_id: Uuid) -> Stores {
        Stores::new(self.stores.ctx.for_entity(entity_id))
    }

    pub fn context(&self) -> &StoreContext {
        &self.stores.ctx
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the connection manager
    pub fn manager(&self) -> &PostgresConnectionManager {
        &self.manager
    }

    pub async fn is_ready(&self) -> Result<bool> {
        self.manager.test_connection().await
    }

    pub async fn close(&self) {
        self.manager.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::TableTraits;
    use sqlx::postgres::PgPoolOptions;

    const URL: &str = "postgres://localhost/eliza_test";

    fn lazy_adapter() -> PostgresAdapter {
        let pool = PgPoolOptions::new()
            .connect_lazy(URL)
            .expect("valid connection string");
        PostgresAdapter::with_manager(PostgresConnectionManager::from_pool(pool), StoreConfig::new(URL))
    }

    #[tokio::test]
    async fn test_plugin_tables_join_registry() {
        let adapter = lazy_adapter()
            .with_plugin(
                PluginSchema::new("@test/plugin-notes")
                    .statement("CREATE TABLE IF NOT EXISTS notes (id UUID PRIMARY KEY, room_id UUID)")
                    .table(TableTraits::new("notes").room("room_id").strict()),
            )
            .expect("valid descriptor");

        assert!(adapter.registry().is_strict("notes"));
        assert!(adapter.registry().get("memories").is_some());
    }

    #[tokio::test]
    async fn test_invalid_plugin_table_rejected() {
        let result = lazy_adapter()
            .with_plugin(PluginSchema::new("@test/plugin-bad").table(TableTraits::new("Bad Name")));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_scoped_stores() {
        let adapter = lazy_adapter();
        let entity_id = Uuid::new_v4();

        assert_eq!(adapter.stores().entity_id(), None);
        assert_eq!(adapter.for_entity(entity_id).entity_id(), Some(entity_id));
        assert_eq!(adapter.for_entity(entity_id).context().server_id(), Uuid::nil());
    }
}
