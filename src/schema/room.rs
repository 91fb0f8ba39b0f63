#![allow(missing_docs)]
//! Room schema

use crate::types::{ChannelType, Room};

pub const CREATE_ROOMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    agent_id UUID REFERENCES agents(id) ON DELETE CASCADE,
    source TEXT NOT NULL,
    type TEXT NOT NULL,
    message_server_id UUID,
    world_id UUID REFERENCES worlds(id) ON DELETE CASCADE,
    name TEXT,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    channel_id TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_ROOMS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_rooms_agent_id ON rooms (agent_id);
CREATE INDEX IF NOT EXISTS idx_rooms_world_id ON rooms (world_id);
CREATE INDEX IF NOT EXISTS idx_rooms_channel_id ON rooms (channel_id);
"#;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct RoomRecord {
    pub id: uuid::Uuid,
    pub agent_id: Option<uuid::Uuid>,
    pub source: String,
    #[cfg_attr(feature = "native", sqlx(rename = "type"))]
    pub room_type: String,
    pub message_server_id: Option<uuid::Uuid>,
    pub world_id: Option<uuid::Uuid>,
    pub name: Option<String>,
    pub metadata: serde_json::Value,
    pub channel_id: Option<String>,
}

impl RoomRecord {
    pub fn to_room(&self) -> Room {
        Room {
            id: self.id,
            name: self.name.clone(),
            agent_id: self.agent_id,
            source: self.source.clone(),
            room_type: ChannelType::parse(&self.room_type),
            channel_id: self.channel_id.clone(),
            message_server_id: self.message_server_id,
            world_id: self.world_id,
            metadata: self.metadata.as_object().cloned().unwrap_or_default(),
        }
    }
}
