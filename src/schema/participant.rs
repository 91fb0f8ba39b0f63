#![allow(missing_docs)]
//! Participant schema

use crate::types::{Participant, ParticipantState};

pub const CREATE_PARTICIPANTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS participants (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    entity_id UUID NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    room_id UUID NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
    agent_id UUID REFERENCES agents(id) ON DELETE CASCADE,
    room_state TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_PARTICIPANTS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_participants_entity_id ON participants (entity_id);
CREATE INDEX IF NOT EXISTS idx_participants_room_id ON participants (room_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_participants_unique ON participants (entity_id, room_id);
"#;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct ParticipantRecord {
    pub id: uuid::Uuid,
    pub entity_id: uuid::Uuid,
    pub room_id: uuid::Uuid,
    pub room_state: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ParticipantRecord {
    pub fn to_participant(&self) -> Participant {
        Participant {
            id: self.id,
            entity_id: self.entity_id,
            room_id: self.room_id,
            user_state: self.room_state.as_deref().and_then(ParticipantState::parse),
            created_at: Some(self.created_at.timestamp_millis()),
        }
    }
}
