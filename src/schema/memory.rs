#![allow(missing_docs)]
//! Memory schema

use crate::types::{Content, Memory};

pub const CREATE_MEMORIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id UUID PRIMARY KEY NOT NULL,
    type TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    content JSONB NOT NULL,
    entity_id UUID REFERENCES entities(id) ON DELETE CASCADE,
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    room_id UUID REFERENCES rooms(id) ON DELETE CASCADE,
    world_id UUID REFERENCES worlds(id) ON DELETE CASCADE,
    "unique" BOOLEAN NOT NULL DEFAULT true,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb
)
"#;

pub const CREATE_MEMORIES_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_memories_type_room ON memories (type, room_id);
CREATE INDEX IF NOT EXISTS idx_memories_world_id ON memories (world_id);
CREATE INDEX IF NOT EXISTS idx_memories_metadata_type ON memories ((metadata->>'type'));
CREATE INDEX IF NOT EXISTS idx_memories_document_id ON memories ((metadata->>'documentId'));
CREATE INDEX IF NOT EXISTS idx_fragments_order ON memories ((metadata->>'documentId'), (metadata->>'position'));
"#;

/// Databases created before memories referenced their world get the
/// cascade too. Existing rows are not validated.
pub const ADD_MEMORIES_WORLD_FK: &str = r#"
DO $$
BEGIN
    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint
        WHERE conname = 'memories_world_id_fkey' AND conrelid = 'memories'::regclass
    ) THEN
        ALTER TABLE memories
            ADD CONSTRAINT memories_world_id_fkey FOREIGN KEY (world_id)
            REFERENCES worlds(id) ON DELETE CASCADE NOT VALID;
    END IF;
END $$
"#;

/// Columns selected for a [`MemoryRecord`], prefixed with the `m` alias
pub const MEMORY_COLUMNS: &str =
    r#"m.id, m.type, m.created_at, m.content, m.entity_id, m.agent_id, m.room_id, m.world_id, m."unique", m.metadata"#;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct MemoryRecord {
    pub id: uuid::Uuid,
    #[cfg_attr(feature = "native", sqlx(rename = "type"))]
    pub memory_type: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub content: serde_json::Value,
    pub entity_id: Option<uuid::Uuid>,
    pub agent_id: uuid::Uuid,
    pub room_id: Option<uuid::Uuid>,
    pub world_id: Option<uuid::Uuid>,
    pub unique: bool,
    pub metadata: serde_json::Value,
}

impl MemoryRecord {
    pub fn to_memory(&self) -> Memory {
        let content: Content = serde_json::from_value(self.content.clone()).unwrap_or_default();

        Memory {
            id: Some(self.id),
            entity_id: self.entity_id.unwrap_or_default(),
            agent_id: self.agent_id,
            room_id: self.room_id.unwrap_or_default(),
            world_id: self.world_id,
            content,
            embedding: None,
            unique: Some(self.unique),
            metadata: self.metadata.as_object().cloned().unwrap_or_default(),
            created_at: Some(self.created_at.timestamp_millis()),
            similarity: None,
        }
    }
}
