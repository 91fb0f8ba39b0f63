#![allow(missing_docs)]
//! Migration system for the SQL isolation layer.
//!
//! Each plugin contributes a [`PluginSchema`]: its DDL and the table
//! descriptors the isolation registry needs. Schemas are applied once per
//! content hash, inside a transaction, and recorded in the `migrations`
//! bookkeeping schema together with a snapshot and a journal entry.
//!
//! # Features
//!
//! - Plugin-based schema migrations
//! - Schema snapshot tracking
//! - Migration history tracking
//! - Transaction-safe migrations
//! - Plugin schema namespacing

pub mod plugin;
pub mod schema_namespace;
pub mod service;
pub mod storage;
pub mod tracker;

pub use plugin::PluginSchema;
pub use schema_namespace::{derive_schema_name, SchemaNamespaceManager};
pub use service::{MigrationOutcome, MigrationService};
pub use storage::{JournalStorage, SnapshotStorage};
pub use tracker::MigrationTracker;
