#![allow(missing_docs)]
//! Capability traits per entity family and their query parameters.
//!
//! Each store implements one trait. The Postgres adapter hands out the
//! stores; callers depend on the traits.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::runs::RunQuery;
use crate::schema::EmbeddingDimension;
use crate::types::{
    Agent, AgentUpdate, Channel, ChannelType, ChannelUpdate, Component, Entity, Log, Memory,
    Message, MessageServer, Metadata, Participant, ParticipantState, Relationship, Room,
    RunSummaryPage, Task, TaskUpdate, World,
};

#[derive(Clone, Debug, Default)]
pub struct GetMemoriesParams {
    pub table_name: String,
    pub entity_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub world_id: Option<Uuid>,
    pub unique: Option<bool>,
    /// Created at or after (ms)
    pub start: Option<i64>,
    /// Created at or before (ms)
    pub end: Option<i64>,
    pub count: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct SearchMemoriesParams {
    pub table_name: String,
    pub embedding: Vec<f32>,
    /// Minimum similarity, defaults to 0.7
    pub match_threshold: Option<f64>,
    /// Result cap, defaults to 10
    pub count: Option<i64>,
    pub agent_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub world_id: Option<Uuid>,
    pub entity_id: Option<Uuid>,
    pub unique: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct EmbeddingSearchResult {
    pub memory_id: Uuid,
    pub embedding: Vec<f32>,
}

#[derive(Clone, Debug, Default)]
pub struct GetCachedEmbeddingsParams {
    pub table_name: String,
    pub agent_id: Option<Uuid>,
    pub match_count: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct LogParams {
    pub body: serde_json::Value,
    pub entity_id: Uuid,
    pub room_id: Option<Uuid>,
    pub log_type: String,
}

#[derive(Clone, Debug, Default)]
pub struct GetLogsParams {
    pub entity_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub log_type: Option<String>,
    /// Created at or after (ms)
    pub start: Option<i64>,
    /// Created at or before (ms)
    pub end: Option<i64>,
    pub count: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct CreateRelationshipParams {
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    pub agent_id: Uuid,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

#[derive(Clone, Debug)]
pub struct GetRelationshipsParams {
    pub entity_id: Uuid,
    /// Only relationships sharing at least one tag
    pub tags: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct GetTasksParams {
    pub room_id: Option<Uuid>,
    pub world_id: Option<Uuid>,
    pub entity_id: Option<Uuid>,
    /// Only tasks carrying every tag
    pub tags: Option<Vec<String>>,
    pub agent_id: Option<Uuid>,
}

#[derive(Clone, Debug)]
pub struct CreateChannelParams {
    pub id: Option<Uuid>,
    pub message_server_id: Uuid,
    pub name: String,
    pub channel_type: ChannelType,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub topic: Option<String>,
    pub metadata: Metadata,
}

#[derive(Clone, Debug)]
pub struct CreateMessageParams {
    pub id: Option<Uuid>,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub raw_message: Option<serde_json::Value>,
    pub in_reply_to_root_message_id: Option<Uuid>,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub metadata: Metadata,
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get_agent(&self, agent_id: Uuid) -> Result<Option<Agent>>;
    async fn get_agents(&self) -> Result<Vec<Agent>>;
    /// Conflict-tolerant; returns false when the id already exists
    async fn create_agent(&self, agent: &Agent) -> Result<bool>;
    /// Settings are deep-merged; returns false when the agent is missing
    async fn update_agent(&self, agent_id: Uuid, update: &AgentUpdate) -> Result<bool>;
    /// Cascades to everything the agent owns
    async fn delete_agent(&self, agent_id: Uuid) -> Result<bool>;
    async fn count_agents(&self) -> Result<i64>;
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_entities_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Entity>>;
    /// Entities participating in a room, optionally with components
    async fn get_entities_for_room(&self, room_id: Uuid, include_components: bool) -> Result<Vec<Entity>>;
    async fn create_entities(&self, entities: &[Entity]) -> Result<bool>;
    async fn update_entity(&self, entity: &Entity) -> Result<bool>;
    async fn delete_entity(&self, entity_id: Uuid) -> Result<bool>;
    /// Entities whose names overlap `names`
    async fn get_entities_by_names(&self, names: &[String], agent_id: Uuid) -> Result<Vec<Entity>>;
    /// Case-insensitive substring search over names
    async fn search_entities_by_name(&self, query: &str, agent_id: Uuid, limit: i64) -> Result<Vec<Entity>>;

    async fn get_component(
        &self,
        entity_id: Uuid,
        component_type: &str,
        world_id: Option<Uuid>,
        source_entity_id: Option<Uuid>,
    ) -> Result<Option<Component>>;
    async fn get_components(
        &self,
        entity_id: Uuid,
        world_id: Option<Uuid>,
        source_entity_id: Option<Uuid>,
    ) -> Result<Vec<Component>>;
    async fn create_component(&self, component: &Component) -> Result<bool>;
    async fn update_component(&self, component: &Component) -> Result<bool>;
    async fn delete_component(&self, component_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn create_world(&self, world: &World) -> Result<Uuid>;
    async fn get_world(&self, id: Uuid) -> Result<Option<World>>;
    async fn get_all_worlds(&self) -> Result<Vec<World>>;
    async fn update_world(&self, world: &World) -> Result<bool>;
    /// Deletes the world with its rooms and everything scoped to them
    async fn remove_world(&self, id: Uuid) -> Result<()>;

    async fn create_rooms(&self, rooms: &[Room]) -> Result<Vec<Uuid>>;
    async fn get_rooms_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Room>>;
    async fn get_rooms_by_world(&self, world_id: Uuid) -> Result<Vec<Room>>;
    async fn update_room(&self, room: &Room) -> Result<bool>;
    async fn delete_room(&self, room_id: Uuid) -> Result<bool>;
    async fn delete_rooms_by_world_id(&self, world_id: Uuid) -> Result<()>;

    async fn add_participants_room(&self, entity_ids: &[Uuid], room_id: Uuid) -> Result<bool>;
    async fn remove_participant(&self, entity_id: Uuid, room_id: Uuid) -> Result<bool>;
    async fn get_participants_for_entity(&self, entity_id: Uuid) -> Result<Vec<Participant>>;
    async fn get_participants_for_room(&self, room_id: Uuid) -> Result<Vec<Uuid>>;
    async fn is_room_participant(&self, room_id: Uuid, entity_id: Uuid) -> Result<bool>;
    async fn get_rooms_for_participant(&self, entity_id: Uuid) -> Result<Vec<Uuid>>;
    async fn get_rooms_for_participants(&self, entity_ids: &[Uuid]) -> Result<Vec<Uuid>>;
    async fn get_participant_user_state(&self, room_id: Uuid, entity_id: Uuid) -> Result<Option<ParticipantState>>;
    async fn set_participant_user_state(
        &self,
        room_id: Uuid,
        entity_id: Uuid,
        state: Option<ParticipantState>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Idempotent per ordered (source, target) pair
    async fn create_relationship(&self, params: &CreateRelationshipParams) -> Result<bool>;
    async fn update_relationship(&self, relationship: &Relationship) -> Result<bool>;
    /// Oldest relationship from source to target, optionally sharing one of `tags`
    async fn get_relationship(
        &self,
        source_entity_id: Uuid,
        target_entity_id: Uuid,
        tags: Option<&[String]>,
    ) -> Result<Option<Relationship>>;
    /// Relationships where the entity is source or target
    async fn get_relationships(&self, params: &GetRelationshipsParams) -> Result<Vec<Relationship>>;
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert with near-duplicate detection; returns the memory id
    async fn create_memory(&self, memory: &Memory, table_name: &str) -> Result<Uuid>;
    async fn get_memories(&self, params: &GetMemoriesParams) -> Result<Vec<Memory>>;
    async fn get_memory_by_id(&self, id: Uuid) -> Result<Option<Memory>>;
    async fn get_memories_by_ids(&self, ids: &[Uuid], table_name: Option<&str>) -> Result<Vec<Memory>>;
    async fn get_memories_by_room_ids(&self, table_name: &str, room_ids: &[Uuid], limit: Option<i64>) -> Result<Vec<Memory>>;
    async fn get_memories_by_world_id(&self, world_id: Uuid, table_name: Option<&str>, count: Option<i64>) -> Result<Vec<Memory>>;
    async fn search_memories(&self, params: &SearchMemoriesParams) -> Result<Vec<Memory>>;
    async fn get_cached_embeddings(&self, params: &GetCachedEmbeddingsParams) -> Result<Vec<EmbeddingSearchResult>>;
    /// Updates content, metadata and (when present) the embedding
    async fn update_memory(&self, memory: &Memory) -> Result<bool>;
    async fn delete_memory(&self, memory_id: Uuid) -> Result<()>;
    async fn delete_many_memories(&self, memory_ids: &[Uuid]) -> Result<()>;
    async fn delete_all_memories(&self, room_id: Uuid, table_name: &str) -> Result<()>;
    async fn count_memories(&self, room_id: Uuid, unique: bool, table_name: Option<&str>) -> Result<i64>;
    /// Width the agent's vectors are stored in, the configured default if none is recorded
    async fn get_embedding_dimension(&self, agent_id: Uuid) -> Result<EmbeddingDimension>;
    /// Record the embedding width for an agent. Fails while vectors of another width exist.
    async fn ensure_embedding_dimension(&self, agent_id: Uuid, dimension: EmbeddingDimension) -> Result<()>;
    /// Drop the agent's vectors in any other width and switch to `dimension`
    async fn migrate_embedding_dimension(&self, agent_id: Uuid, dimension: EmbeddingDimension) -> Result<u64>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fails with an integrity error when `world_id` is missing
    async fn create_task(&self, task: &Task) -> Result<Uuid>;
    async fn get_tasks(&self, params: &GetTasksParams) -> Result<Vec<Task>>;
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;
    async fn get_tasks_by_name(&self, name: &str) -> Result<Vec<Task>>;
    async fn update_task(&self, id: Uuid, update: &TaskUpdate) -> Result<bool>;
    async fn delete_task(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn log(&self, params: &LogParams) -> Result<Uuid>;
    async fn get_logs(&self, params: &GetLogsParams) -> Result<Vec<Log>>;
    async fn delete_log(&self, log_id: Uuid) -> Result<bool>;
    /// Run summaries for an agent, grouped and paged in memory
    async fn get_agent_run_summaries(&self, agent_id: Uuid, query: &RunQuery) -> Result<RunSummaryPage>;
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_cache(&self, agent_id: Uuid, key: &str) -> Result<Option<serde_json::Value>>;
    /// Last write wins; `ttl_ms` sets an expiry
    async fn set_cache(&self, agent_id: Uuid, key: &str, value: &serde_json::Value, ttl_ms: Option<i64>) -> Result<bool>;
    async fn delete_cache(&self, agent_id: Uuid, key: &str) -> Result<bool>;
}

#[async_trait]
pub trait MessagingStore: Send + Sync {
    async fn create_message_server(&self, server: &MessageServer) -> Result<MessageServer>;
    async fn get_message_servers(&self) -> Result<Vec<MessageServer>>;
    async fn get_message_server_by_id(&self, id: Uuid) -> Result<Option<MessageServer>>;
    async fn add_agent_to_message_server(&self, message_server_id: Uuid, agent_id: Uuid) -> Result<()>;
    async fn get_agents_for_message_server(&self, message_server_id: Uuid) -> Result<Vec<Uuid>>;
    async fn remove_agent_from_message_server(&self, message_server_id: Uuid, agent_id: Uuid) -> Result<bool>;

    async fn create_channel(&self, params: &CreateChannelParams, participant_ids: &[Uuid]) -> Result<Channel>;
    async fn get_channels_for_message_server(&self, message_server_id: Uuid) -> Result<Vec<Channel>>;
    async fn get_channel_details(&self, channel_id: Uuid) -> Result<Option<Channel>>;
    /// Re-reads after writing; a concurrent delete surfaces as not-found
    async fn update_channel(&self, channel_id: Uuid, update: &ChannelUpdate) -> Result<Channel>;
    /// Removes messages and participants with the channel
    async fn delete_channel(&self, channel_id: Uuid) -> Result<bool>;
    async fn add_channel_participants(&self, channel_id: Uuid, entity_ids: &[Uuid]) -> Result<()>;
    async fn get_channel_participants(&self, channel_id: Uuid) -> Result<Vec<Uuid>>;
    /// Finds or creates the DM channel for a pair of entities
    async fn find_or_create_dm_channel(&self, a: Uuid, b: Uuid, message_server_id: Uuid) -> Result<Channel>;

    async fn create_message(&self, params: &CreateMessageParams) -> Result<Message>;
    /// Newest first, strictly older than `before` (ms) when given
    async fn get_messages_for_channel(&self, channel_id: Uuid, limit: i64, before: Option<i64>) -> Result<Vec<Message>>;
    async fn delete_message(&self, message_id: Uuid) -> Result<bool>;
}
