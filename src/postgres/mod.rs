//! PostgreSQL backend: connection pool, isolation context, policy installer
//! and the per-family stores.

pub mod adapter;
pub mod context;
pub mod isolation;
pub mod manager;
pub mod stores;

pub use adapter::{PostgresAdapter, Stores};
pub use context::{ContextConn, ContextTx, IsolatedTx, StoreContext};
pub use isolation::PolicyInstaller;
pub use manager::PostgresConnectionManager;
pub use stores::{
    PgAgentStore, PgCacheStore, PgEntityStore, PgLogStore, PgMemoryStore, PgMessagingStore,
    PgRelationshipStore, PgRoomStore, PgTaskStore,
};
