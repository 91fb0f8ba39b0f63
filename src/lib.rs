#![allow(missing_docs)]
//! Multi-tenant PostgreSQL storage for elizaOS agents.
//!
//! Every transaction is bound to a tenant (server) and optionally to an
//! entity. Row-level policies installed at boot filter what each binding can
//! read and write; the stores themselves issue plain SQL.

pub mod base;
pub mod config;
pub mod error;
pub mod isolation;
pub mod retry;
pub mod runs;
pub mod schema;
pub mod types;

#[cfg(feature = "native")]
pub mod migration;

#[cfg(feature = "native")]
pub mod postgres;

pub use config::StoreConfig;
pub use error::{ErrorKind, Result, StoreError};
pub use retry::{with_retry, RetryPolicy};
pub use schema::EmbeddingDimension;

#[cfg(feature = "native")]
pub use postgres::{PostgresAdapter, StoreContext, Stores};

/// Name and description of this plugin, as reported to the host runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: &'static str,
    pub description: &'static str,
}

pub fn plugin() -> PluginInfo {
    PluginInfo {
        name: "sql",
        description: "PostgreSQL storage with tenant and entity row-level isolation",
    }
}
