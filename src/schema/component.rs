#![allow(missing_docs)]
//! Component schema

use crate::types::Component;

pub const CREATE_COMPONENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS components (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    entity_id UUID NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    room_id UUID REFERENCES rooms(id) ON DELETE CASCADE,
    world_id UUID REFERENCES worlds(id) ON DELETE CASCADE,
    source_entity_id UUID REFERENCES entities(id) ON DELETE SET NULL,
    type TEXT NOT NULL,
    data JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_COMPONENTS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_components_entity_type ON components (entity_id, type);
CREATE INDEX IF NOT EXISTS idx_components_room_id ON components (room_id);
CREATE INDEX IF NOT EXISTS idx_components_world_id ON components (world_id);
"#;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct ComponentRecord {
    pub id: uuid::Uuid,
    pub entity_id: uuid::Uuid,
    pub agent_id: uuid::Uuid,
    pub room_id: Option<uuid::Uuid>,
    pub world_id: Option<uuid::Uuid>,
    pub source_entity_id: Option<uuid::Uuid>,
    #[cfg_attr(feature = "native", sqlx(rename = "type"))]
    pub component_type: String,
    pub data: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ComponentRecord {
    pub fn to_component(&self) -> Component {
        Component {
            id: self.id,
            entity_id: self.entity_id,
            agent_id: self.agent_id,
            room_id: self.room_id,
            world_id: self.world_id,
            source_entity_id: self.source_entity_id,
            component_type: self.component_type.clone(),
            data: self.data.as_object().cloned().unwrap_or_default(),
            created_at: Some(self.created_at.timestamp_millis()),
        }
    }
}
