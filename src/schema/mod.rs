#![allow(missing_docs)]
//! Database schema definitions
//!
//! DDL constants per table plus the row records the stores decode into.

pub mod agent;
pub mod cache;
pub mod component;
pub mod embedding;
pub mod entity;
pub mod log;
pub mod memory;
pub mod messaging;
pub mod participant;
pub mod relationship;
pub mod room;
pub mod server;
pub mod task;
pub mod world;

pub use agent::AgentRecord;
pub use component::ComponentRecord;
pub use embedding::EmbeddingDimension;
pub use entity::EntityRecord;
pub use log::LogRecord;
pub use memory::MemoryRecord;
pub use messaging::{ChannelRecord, MessageRecord, MessageServerRecord};
pub use participant::ParticipantRecord;
pub use relationship::RelationshipRecord;
pub use room::RoomRecord;
pub use task::TaskRecord;
pub use world::WorldRecord;

/// Table names used in the database
pub mod table_names {
    pub const SERVERS: &str = "servers";
    pub const AGENTS: &str = "agents";
    pub const MEMORIES: &str = "memories";
    pub const EMBEDDINGS: &str = "embeddings";
    pub const ENTITIES: &str = "entities";
    pub const ROOMS: &str = "rooms";
    pub const WORLDS: &str = "worlds";
    pub const COMPONENTS: &str = "components";
    pub const PARTICIPANTS: &str = "participants";
    pub const RELATIONSHIPS: &str = "relationships";
    pub const TASKS: &str = "tasks";
    pub const LOGS: &str = "logs";
    pub const CACHE: &str = "cache";
    pub const MESSAGE_SERVERS: &str = "message_servers";
    pub const MESSAGE_SERVER_AGENTS: &str = "message_server_agents";
    pub const CHANNELS: &str = "channels";
    pub const CHANNEL_PARTICIPANTS: &str = "channel_participants";
    pub const MESSAGES: &str = "messages";
}

/// Core DDL in foreign-key order. The embeddings table follows memories.
pub fn core_statements() -> Vec<&'static str> {
    let mut statements = vec![
        server::CREATE_SERVERS_TABLE,
        embedding::ENSURE_VECTOR_EXTENSION,
        agent::CREATE_AGENTS_TABLE,
        agent::ADD_AGENTS_EMBEDDING_DIMENSION,
        agent::CREATE_AGENTS_INDEXES,
        world::CREATE_WORLDS_TABLE,
        world::CREATE_WORLDS_INDEXES,
        entity::CREATE_ENTITIES_TABLE,
        entity::CREATE_ENTITIES_INDEXES,
        room::CREATE_ROOMS_TABLE,
        room::CREATE_ROOMS_INDEXES,
        memory::CREATE_MEMORIES_TABLE,
        memory::ADD_MEMORIES_WORLD_FK,
        memory::CREATE_MEMORIES_INDEXES,
        embedding::CREATE_EMBEDDINGS_TABLE,
        embedding::ADD_EMBEDDINGS_AGENT_ID,
    ];
    statements.extend_from_slice(embedding::CREATE_EMBEDDINGS_INDEXES);
    statements.extend_from_slice(&[
        component::CREATE_COMPONENTS_TABLE,
        component::CREATE_COMPONENTS_INDEXES,
        participant::CREATE_PARTICIPANTS_TABLE,
        participant::CREATE_PARTICIPANTS_INDEXES,
        relationship::CREATE_RELATIONSHIPS_TABLE,
        relationship::CREATE_RELATIONSHIPS_INDEXES,
        task::CREATE_TASKS_TABLE,
        task::CREATE_TASKS_INDEXES,
        log::CREATE_LOGS_TABLE,
        log::CREATE_LOGS_INDEXES,
        cache::CREATE_CACHE_TABLE,
        cache::CREATE_CACHE_INDEXES,
        messaging::CREATE_MESSAGE_SERVERS_TABLE,
        messaging::CREATE_MESSAGE_SERVER_AGENTS_TABLE,
        messaging::CREATE_CHANNELS_TABLE,
        messaging::CREATE_CHANNEL_PARTICIPANTS_TABLE,
        messaging::CREATE_MESSAGES_TABLE,
        messaging::CREATE_MESSAGING_INDEXES,
    ]);
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_statements_respect_foreign_keys() {
        let statements = core_statements();
        let position = |needle: &str| {
            statements
                .iter()
                .position(|s| s.contains(needle))
                .unwrap_or(usize::MAX)
        };

        assert!(position("CREATE TABLE IF NOT EXISTS agents") < position("CREATE TABLE IF NOT EXISTS worlds"));
        assert!(position("CREATE TABLE IF NOT EXISTS worlds") < position("CREATE TABLE IF NOT EXISTS rooms"));
        assert!(position("CREATE TABLE IF NOT EXISTS memories") < position("CREATE TABLE IF NOT EXISTS embeddings"));
        assert!(position("CREATE TABLE IF NOT EXISTS channels") < position("CREATE TABLE IF NOT EXISTS messages"));
        assert!(position("CREATE EXTENSION IF NOT EXISTS vector") < position("CREATE TABLE IF NOT EXISTS embeddings"));
        assert!(position("CREATE TABLE IF NOT EXISTS memories") < position("memories_world_id_fkey"));
        assert!(position("CREATE TABLE IF NOT EXISTS embeddings") < position("ADD COLUMN IF NOT EXISTS agent_id"));
        assert!(position("CREATE TABLE IF NOT EXISTS agents") < position("ADD COLUMN IF NOT EXISTS embedding_dimension"));
    }
}
