#![allow(missing_docs)]
//! Relationship schema

use crate::types::Relationship;

pub const CREATE_RELATIONSHIPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS relationships (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    source_entity_id UUID NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    target_entity_id UUID NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    tags TEXT[] NOT NULL DEFAULT '{}'::text[],
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    CONSTRAINT unique_relationship UNIQUE (source_entity_id, target_entity_id, agent_id)
)
"#;

pub const CREATE_RELATIONSHIPS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_relationships_users ON relationships (source_entity_id, target_entity_id);
CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships (target_entity_id);
CREATE INDEX IF NOT EXISTS idx_relationships_tags ON relationships USING gin (tags);
"#;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct RelationshipRecord {
    pub id: uuid::Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub source_entity_id: uuid::Uuid,
    pub target_entity_id: uuid::Uuid,
    pub agent_id: uuid::Uuid,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

impl RelationshipRecord {
    pub fn to_relationship(&self) -> Relationship {
        Relationship {
            id: self.id,
            source_entity_id: self.source_entity_id,
            target_entity_id: self.target_entity_id,
            agent_id: self.agent_id,
            tags: self.tags.clone(),
            metadata: self.metadata.as_object().cloned().unwrap_or_default(),
            created_at: Some(self.created_at.timestamp_millis()),
        }
    }
}
