#![allow(missing_docs)]
//! Messaging schema: message servers, channels, channel participants and messages

use crate::types::{Channel, ChannelType, Message, MessageServer};

pub const CREATE_MESSAGE_SERVERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS message_servers (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    name TEXT NOT NULL,
    source_type TEXT NOT NULL,
    source_id TEXT,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_MESSAGE_SERVER_AGENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS message_server_agents (
    message_server_id UUID NOT NULL REFERENCES message_servers(id) ON DELETE CASCADE,
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (message_server_id, agent_id)
)
"#;

pub const CREATE_CHANNELS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS channels (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    message_server_id UUID NOT NULL REFERENCES message_servers(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    source_type TEXT,
    source_id TEXT,
    topic TEXT,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_CHANNEL_PARTICIPANTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS channel_participants (
    channel_id UUID NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
    entity_id UUID NOT NULL,
    PRIMARY KEY (channel_id, entity_id)
)
"#;

pub const CREATE_MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    channel_id UUID NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
    author_id UUID NOT NULL,
    content TEXT NOT NULL,
    raw_message JSONB,
    in_reply_to_root_message_id UUID REFERENCES messages(id) ON DELETE SET NULL,
    source_type TEXT,
    source_id TEXT,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_MESSAGING_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_channels_message_server_id ON channels (message_server_id);
CREATE INDEX IF NOT EXISTS idx_channels_name ON channels (message_server_id, name);
CREATE INDEX IF NOT EXISTS idx_channel_participants_entity_id ON channel_participants (entity_id);
CREATE INDEX IF NOT EXISTS idx_messages_channel_created ON messages (channel_id, created_at);
"#;

/// Deterministic name of the DM channel between two entities.
///
/// Argument order does not matter.
pub fn dm_channel_name(a: uuid::Uuid, b: uuid::Uuid) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("DM-{low}-{high}")
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct MessageServerRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub source_type: String,
    pub source_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl MessageServerRecord {
    pub fn to_message_server(&self) -> MessageServer {
        MessageServer {
            id: self.id,
            name: self.name.clone(),
            source_type: self.source_type.clone(),
            source_id: self.source_id.clone(),
            metadata: self.metadata.as_object().cloned().unwrap_or_default(),
            created_at: Some(self.created_at.timestamp_millis()),
            updated_at: Some(self.updated_at.timestamp_millis()),
        }
    }
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct ChannelRecord {
    pub id: uuid::Uuid,
    pub message_server_id: uuid::Uuid,
    pub name: String,
    #[cfg_attr(feature = "native", sqlx(rename = "type"))]
    pub channel_type: String,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub topic: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ChannelRecord {
    pub fn to_channel(&self) -> Channel {
        Channel {
            id: self.id,
            message_server_id: self.message_server_id,
            name: self.name.clone(),
            channel_type: ChannelType::parse(&self.channel_type),
            source_type: self.source_type.clone(),
            source_id: self.source_id.clone(),
            topic: self.topic.clone(),
            metadata: self.metadata.as_object().cloned().unwrap_or_default(),
            created_at: Some(self.created_at.timestamp_millis()),
            updated_at: Some(self.updated_at.timestamp_millis()),
        }
    }
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct MessageRecord {
    pub id: uuid::Uuid,
    pub channel_id: uuid::Uuid,
    pub author_id: uuid::Uuid,
    pub content: String,
    pub raw_message: Option<serde_json::Value>,
    pub in_reply_to_root_message_id: Option<uuid::Uuid>,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl MessageRecord {
    pub fn to_message(&self) -> Message {
        Message {
            id: self.id,
            channel_id: self.channel_id,
            author_id: self.author_id,
            content: self.content.clone(),
            raw_message: self.raw_message.clone(),
            in_reply_to_root_message_id: self.in_reply_to_root_message_id,
            source_type: self.source_type.clone(),
            source_id: self.source_id.clone(),
            metadata: self.metadata.as_object().cloned().unwrap_or_default(),
            created_at: Some(self.created_at.timestamp_millis()),
            updated_at: Some(self.updated_at.timestamp_millis()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_dm_channel_name_is_order_independent() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Uuid::parse_str("ffffffff-0000-0000-0000-000000000002").unwrap();

        assert_eq!(dm_channel_name(a, b), dm_channel_name(b, a));
        assert_eq!(
            dm_channel_name(b, a),
            "DM-00000000-0000-0000-0000-000000000001-ffffffff-0000-0000-0000-000000000002"
        );
    }
}
