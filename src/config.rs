//! Storage configuration
//!
//! Configuration can be loaded from environment variables or constructed programmatically.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::retry::RetryPolicy;
use crate::schema::embedding::EmbeddingDimension;

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// PostgreSQL connection string (required)
    pub postgres_url: String,

    /// Tenant (server) ID bound into every isolation context
    #[serde(default)]
    pub server_id: Uuid,

    /// Whether row-level isolation is installed and session variables are bound
    #[serde(default)]
    pub data_isolation: bool,

    /// Default embedding width for new agents
    #[serde(default)]
    pub embedding_dimension: EmbeddingDimension,

    /// Pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Retry policy shared by every store
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_max_connections() -> u32 {
    10
}

impl StoreConfig {
    /// Create a new configuration with the required connection string.
    pub fn new(postgres_url: impl Into<String>) -> Self {
        Self {
            postgres_url: postgres_url.into(),
            server_id: Uuid::nil(),
            data_isolation: false,
            embedding_dimension: EmbeddingDimension::default(),
            max_connections: default_max_connections(),
            retry: RetryPolicy::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Required Variables
    ///
    /// - `POSTGRES_URL` (or `DATABASE_URL`): connection string
    ///
    /// # Optional Variables
    ///
    /// - `ELIZA_SERVER_ID`: tenant UUID (defaults to the nil UUID)
    /// - `ENABLE_DATA_ISOLATION`: `true`/`1` to enable row-level isolation
    /// - `EMBEDDING_DIMENSION`: one of 384, 512, 768, 1024, 1536, 3072
    /// - `DB_MAX_CONNECTIONS`: pool size (defaults to 10)
    /// - `DB_RETRY_MAX_ATTEMPTS`, `DB_RETRY_BASE_DELAY_MS`, `DB_RETRY_MAX_DELAY_MS`
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Config` if a variable is missing or malformed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same parsing as [`StoreConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let postgres_url = get("POSTGRES_URL")
            .or_else(|| get("DATABASE_URL"))
            .ok_or_else(|| StoreError::Config("POSTGRES_URL is not set".to_string()))?;

        let mut config = Self::new(postgres_url);

        if let Some(raw) = get("ELIZA_SERVER_ID") {
            config.server_id = Uuid::parse_str(raw.trim())
                .map_err(|e| StoreError::Config(format!("ELIZA_SERVER_ID: {e}")))?;
        }

        if let Some(raw) = get("ENABLE_DATA_ISOLATION") {
            config.data_isolation = matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes");
        }

        if let Some(raw) = get("EMBEDDING_DIMENSION") {
            let width = parse_number::<usize>("EMBEDDING_DIMENSION", &raw)?;
            config.embedding_dimension = EmbeddingDimension::try_from(width)?;
        }

        if let Some(raw) = get("DB_MAX_CONNECTIONS") {
            config.max_connections = parse_number("DB_MAX_CONNECTIONS", &raw)?;
        }

        if let Some(raw) = get("DB_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_number("DB_RETRY_MAX_ATTEMPTS", &raw)?;
        }

        if let Some(raw) = get("DB_RETRY_BASE_DELAY_MS") {
            config.retry.base_delay =
                Duration::from_millis(parse_number("DB_RETRY_BASE_DELAY_MS", &raw)?);
        }

        if let Some(raw) = get("DB_RETRY_MAX_DELAY_MS") {
            config.retry.max_delay =
                Duration::from_millis(parse_number("DB_RETRY_MAX_DELAY_MS", &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set tenant ID (builder pattern)
    pub fn with_server_id(mut self, server_id: Uuid) -> Self {
        self.server_id = server_id;
        self
    }

    /// Enable or disable row-level isolation (builder pattern)
    pub fn with_data_isolation(mut self, enabled: bool) -> Self {
        self.data_isolation = enabled;
        self
    }

    /// Set default embedding width (builder pattern)
    pub fn with_embedding_dimension(mut self, dimension: EmbeddingDimension) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    /// Set pool size (builder pattern)
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set retry policy (builder pattern)
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.postgres_url.trim().is_empty() {
            return Err(StoreError::Config("postgres_url cannot be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(StoreError::Config("max_connections must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(StoreError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(StoreError::Config(
                "retry.base_delay cannot exceed retry.max_delay".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| StoreError::Config(format!("{key} must be a number, got {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[("POSTGRES_URL", "postgres://localhost/eliza")])).unwrap();
        assert_eq!(config.server_id, Uuid::nil());
        assert!(!config.data_isolation);
        assert_eq!(config.embedding_dimension, EmbeddingDimension::Dim384);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_database_url_fallback() {
        let config = StoreConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://db/fallback")])).unwrap();
        assert_eq!(config.postgres_url, "postgres://db/fallback");
    }

    #[test]
    fn test_full_environment() {
        let server = Uuid::new_v4();
        let server_str = server.to_string();
        let config = StoreConfig::from_lookup(lookup(&[
            ("POSTGRES_URL", "postgres://localhost/eliza"),
            ("ELIZA_SERVER_ID", server_str.as_str()),
            ("ENABLE_DATA_ISOLATION", "TRUE"),
            ("EMBEDDING_DIMENSION", "1536"),
            ("DB_MAX_CONNECTIONS", "4"),
            ("DB_RETRY_MAX_ATTEMPTS", "5"),
            ("DB_RETRY_BASE_DELAY_MS", "50"),
            ("DB_RETRY_MAX_DELAY_MS", "400"),
        ]))
        .unwrap();

        assert_eq!(config.server_id, server);
        assert!(config.data_isolation);
        assert_eq!(config.embedding_dimension, EmbeddingDimension::Dim1536);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(50));
        assert_eq!(config.retry.max_delay, Duration::from_millis(400));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(StoreConfig::from_lookup(lookup(&[])).is_err());
        assert!(StoreConfig::from_lookup(lookup(&[
            ("POSTGRES_URL", "postgres://x"),
            ("ELIZA_SERVER_ID", "not-a-uuid"),
        ]))
        .is_err());
        assert!(matches!(
            StoreConfig::from_lookup(lookup(&[
                ("POSTGRES_URL", "postgres://x"),
                ("EMBEDDING_DIMENSION", "100"),
            ])),
            Err(StoreError::InvalidDimension(100))
        ));
        assert!(StoreConfig::from_lookup(lookup(&[
            ("POSTGRES_URL", "postgres://x"),
            ("DB_RETRY_MAX_ATTEMPTS", "0"),
        ]))
        .is_err());
    }
}
