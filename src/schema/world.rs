#![allow(missing_docs)]
//! World schema

use crate::types::World;

pub const CREATE_WORLDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS worlds (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    name TEXT,
    message_server_id UUID,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_WORLDS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_worlds_agent_id ON worlds (agent_id);
"#;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct WorldRecord {
    pub id: uuid::Uuid,
    pub agent_id: uuid::Uuid,
    pub name: Option<String>,
    pub message_server_id: Option<uuid::Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl WorldRecord {
    pub fn to_world(&self) -> World {
        World {
            id: self.id,
            agent_id: self.agent_id,
            name: self.name.clone(),
            message_server_id: self.message_server_id,
            metadata: self.metadata.as_object().cloned().unwrap_or_default(),
        }
    }
}
