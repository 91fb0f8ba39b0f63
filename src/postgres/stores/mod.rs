//! Postgres implementations of the per-family store traits.
//!
//! Every operation runs inside `StoreContext::retry` and opens its own
//! transaction through `StoreContext::begin`, so the tenant and entity
//! bindings never outlive a single logical operation.

mod agent;
mod cache;
mod entity;
mod log;
mod memory;
mod messaging;
mod relationship;
mod room;
mod task;

pub use agent::PgAgentStore;
pub use cache::PgCacheStore;
pub use entity::PgEntityStore;
pub use log::PgLogStore;
pub use memory::PgMemoryStore;
pub use messaging::PgMessagingStore;
pub use relationship::PgRelationshipStore;
pub use room::PgRoomStore;
pub use task::PgTaskStore;

use crate::types::Metadata;

pub(crate) fn json_object(map: &Metadata) -> serde_json::Value {
    serde_json::Value::Object(map.clone())
}

/// Milliseconds since the epoch as a timestamp
pub(crate) fn from_millis(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
