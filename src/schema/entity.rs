#![allow(missing_docs)]
//! Entity schema

use crate::types::Entity;

pub const CREATE_ENTITIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    names TEXT[] NOT NULL DEFAULT '{}'::text[],
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb
)
"#;

pub const CREATE_ENTITIES_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entities_agent_id ON entities (agent_id);
CREATE INDEX IF NOT EXISTS idx_entities_names ON entities USING gin (names);
"#;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct EntityRecord {
    pub id: uuid::Uuid,
    pub agent_id: uuid::Uuid,
    pub names: Vec<String>,
    pub metadata: serde_json::Value,
}

impl EntityRecord {
    pub fn to_entity(&self) -> Entity {
        Entity {
            id: self.id,
            agent_id: self.agent_id,
            names: self.names.clone(),
            metadata: self.metadata.as_object().cloned().unwrap_or_default(),
            components: Vec::new(),
        }
    }
}
