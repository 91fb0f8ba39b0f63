//! PostgreSQL connection manager

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::Result;

/// PostgreSQL connection manager
pub struct PostgresConnectionManager {
    pool: PgPool,
}

impl PostgresConnectionManager {
    /// Connect using the pool settings from `config`
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        info!(max_connections = config.max_connections, "Connecting to PostgreSQL...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.postgres_url)
            .await?;

        info!("Connected to PostgreSQL successfully");

        Ok(PostgresConnectionManager { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        PostgresConnectionManager { pool }
    }

    /// Get the connection pool
    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    /// Test the connection
    pub async fn test_connection(&self) -> Result<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }

    /// Close all connections
    pub async fn close(&self) {
        debug!("Closing PostgreSQL connection pool");
        self.pool.close().await;
    }
}
