#![allow(missing_docs)]
//! Task schema

use crate::types::{Task, TaskStatus};

pub const CREATE_TASKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    name TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    room_id UUID REFERENCES rooms(id) ON DELETE CASCADE,
    world_id UUID NOT NULL REFERENCES worlds(id) ON DELETE CASCADE,
    entity_id UUID REFERENCES entities(id) ON DELETE CASCADE,
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    tags TEXT[] NOT NULL DEFAULT '{}'::text[],
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_TASKS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_tasks_room_id ON tasks (room_id);
CREATE INDEX IF NOT EXISTS idx_tasks_world_id ON tasks (world_id);
CREATE INDEX IF NOT EXISTS idx_tasks_agent_id ON tasks (agent_id);
CREATE INDEX IF NOT EXISTS idx_tasks_name ON tasks (name);
CREATE INDEX IF NOT EXISTS idx_tasks_tags ON tasks USING gin (tags);
"#;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct TaskRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub room_id: Option<uuid::Uuid>,
    pub world_id: uuid::Uuid,
    pub entity_id: Option<uuid::Uuid>,
    pub agent_id: uuid::Uuid,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TaskRecord {
    pub fn to_task(&self) -> Task {
        Task {
            id: Some(self.id),
            name: self.name.clone(),
            description: self.description.clone(),
            status: TaskStatus::parse(&self.status),
            agent_id: self.agent_id,
            room_id: self.room_id,
            world_id: Some(self.world_id),
            entity_id: self.entity_id,
            tags: self.tags.clone(),
            metadata: self.metadata.as_object().cloned().unwrap_or_default(),
            created_at: Some(self.created_at.timestamp_millis()),
            updated_at: Some(self.updated_at.timestamp_millis()),
        }
    }
}
