#![allow(missing_docs)]
//! Log schema

use crate::types::Log;

pub const CREATE_LOGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    entity_id UUID NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    body JSONB NOT NULL,
    type TEXT NOT NULL,
    room_id UUID REFERENCES rooms(id) ON DELETE CASCADE
)
"#;

pub const CREATE_LOGS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_logs_entity_id ON logs (entity_id);
CREATE INDEX IF NOT EXISTS idx_logs_room_id ON logs (room_id);
CREATE INDEX IF NOT EXISTS idx_logs_type_created ON logs (type, created_at);
CREATE INDEX IF NOT EXISTS idx_logs_run_id ON logs ((body->>'runId'));
"#;

/// Log type carrying run lifecycle events
pub const RUN_EVENT: &str = "run_event";

#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct LogRecord {
    pub id: uuid::Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub entity_id: uuid::Uuid,
    pub body: serde_json::Value,
    #[cfg_attr(feature = "native", sqlx(rename = "type"))]
    pub log_type: String,
    pub room_id: Option<uuid::Uuid>,
}

impl LogRecord {
    pub fn to_log(&self) -> Log {
        Log {
            id: self.id,
            entity_id: self.entity_id,
            room_id: self.room_id,
            log_type: self.log_type.clone(),
            body: self.body.clone(),
            created_at: self.created_at.timestamp_millis(),
        }
    }
}
