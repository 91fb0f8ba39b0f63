//! Domain types persisted by the storage layer
//!
//! Timestamps are milliseconds since the Unix epoch, matching the rest of elizaOS.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Free-form JSON metadata map
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// An agent hosted by a tenant
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Agent ID
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Optional username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Biography lines
    #[serde(default)]
    pub bio: Vec<String>,
    /// Settings map
    #[serde(default)]
    pub settings: Metadata,
    /// Whether the agent is enabled
    pub enabled: bool,
    /// Creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last update time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Agent {
    /// Create an enabled agent with the given name
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Agent {
            id,
            name: name.into(),
            enabled: true,
            ..Default::default()
        }
    }
}

/// Partial agent update. `settings` is deep-merged into the stored settings.
#[derive(Clone, Debug, Default)]
pub struct AgentUpdate {
    /// New name
    pub name: Option<String>,
    /// New username
    pub username: Option<String>,
    /// Replacement biography
    pub bio: Option<Vec<String>>,
    /// Settings patch; a JSON null removes the key
    pub settings: Option<Metadata>,
    /// Enabled flag
    pub enabled: Option<bool>,
}

/// Participant (user, bot or system actor)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Entity ID
    pub id: Uuid,
    /// Owning agent
    pub agent_id: Uuid,
    /// Display names (may alias)
    #[serde(default)]
    pub names: Vec<String>,
    /// Metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Attached components, populated when requested
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
}

/// Typed data attached to an entity
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Component ID
    pub id: Uuid,
    /// Entity the component belongs to
    pub entity_id: Uuid,
    /// Owning agent
    pub agent_id: Uuid,
    /// Room the component was attached in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    /// World scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_id: Option<Uuid>,
    /// Entity that attached the component
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_entity_id: Option<Uuid>,
    /// Component type
    #[serde(rename = "type")]
    pub component_type: String,
    /// Payload
    #[serde(default)]
    pub data: Metadata,
    /// Creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

/// World grouping rooms
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct World {
    /// World ID
    pub id: Uuid,
    /// Owning agent
    pub agent_id: Uuid,
    /// Name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Message server this world mirrors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_server_id: Option<Uuid>,
    /// Metadata
    #[serde(default)]
    pub metadata: Metadata,
}

/// Room kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    /// Agent talking to itself
    #[serde(rename = "SELF")]
    SelfChannel,
    /// Direct message
    #[default]
    Dm,
    /// Group chat
    Group,
    /// Voice direct message
    VoiceDm,
    /// Voice group
    VoiceGroup,
    /// Feed
    Feed,
    /// Thread
    Thread,
    /// World-level channel
    World,
    /// Forum
    Forum,
    /// API caller
    Api,
}

impl ChannelType {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::SelfChannel => "SELF",
            ChannelType::Dm => "DM",
            ChannelType::Group => "GROUP",
            ChannelType::VoiceDm => "VOICE_DM",
            ChannelType::VoiceGroup => "VOICE_GROUP",
            ChannelType::Feed => "FEED",
            ChannelType::Thread => "THREAD",
            ChannelType::World => "WORLD",
            ChannelType::Forum => "FORUM",
            ChannelType::Api => "API",
        }
    }

    /// Parse the storage representation, defaulting to DM
    pub fn parse(value: &str) -> Self {
        match value {
            "SELF" => ChannelType::SelfChannel,
            "GROUP" => ChannelType::Group,
            "VOICE_DM" => ChannelType::VoiceDm,
            "VOICE_GROUP" => ChannelType::VoiceGroup,
            "FEED" => ChannelType::Feed,
            "THREAD" => ChannelType::Thread,
            "WORLD" => ChannelType::World,
            "FORUM" => ChannelType::Forum,
            "API" => ChannelType::Api,
            _ => ChannelType::Dm,
        }
    }
}

/// Unit of conversational context
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Room ID
    pub id: Uuid,
    /// Name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Owning agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    /// Source platform
    pub source: String,
    /// Room kind
    #[serde(rename = "type")]
    pub room_type: ChannelType,
    /// External channel ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Message server ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_server_id: Option<Uuid>,
    /// World the room belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_id: Option<Uuid>,
    /// Metadata
    #[serde(default)]
    pub metadata: Metadata,
}

/// Follow/mute state of a participant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantState {
    /// Agent replies without being addressed
    Followed,
    /// Agent ignores the room
    Muted,
}

impl ParticipantState {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantState::Followed => "FOLLOWED",
            ParticipantState::Muted => "MUTED",
        }
    }

    /// Parse the storage representation
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FOLLOWED" => Some(ParticipantState::Followed),
            "MUTED" => Some(ParticipantState::Muted),
            _ => None,
        }
    }
}

/// Participant row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Row ID
    pub id: Uuid,
    /// Entity ID
    pub entity_id: Uuid,
    /// Room ID
    pub room_id: Uuid,
    /// Follow/mute state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_state: Option<ParticipantState>,
    /// Creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

/// Directed edge between two entities
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    /// Relationship ID
    pub id: Uuid,
    /// Source entity
    pub source_entity_id: Uuid,
    /// Target entity
    pub target_entity_id: Uuid,
    /// Owning agent
    pub agent_id: Uuid,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

/// Memory payload
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    /// Text body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Actions referenced by the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    /// Source platform
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Message this one replies to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<Uuid>,
    /// Any other fields
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Content {
    /// Text-only content
    pub fn text(text: impl Into<String>) -> Self {
        Content {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Stored memory
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Memory ID, generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Entity that produced the memory
    pub entity_id: Uuid,
    /// Owning agent
    pub agent_id: Uuid,
    /// Room the memory belongs to
    pub room_id: Uuid,
    /// World scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_id: Option<Uuid>,
    /// Payload
    pub content: Content,
    /// Embedding vector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Uniqueness flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
    /// Metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Similarity score, set by embedding search
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

impl Memory {
    /// Create a text memory
    pub fn message(agent_id: Uuid, entity_id: Uuid, room_id: Uuid, text: &str) -> Self {
        Memory {
            id: Some(Uuid::new_v4()),
            entity_id,
            agent_id,
            room_id,
            content: Content::text(text),
            ..Default::default()
        }
    }

    /// Document this memory is a fragment of, if any
    pub fn document_id(&self) -> Option<Uuid> {
        if self.metadata.get("type").and_then(|t| t.as_str()) != Some("fragment") {
            return None;
        }
        self.metadata
            .get("documentId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Task lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started
    #[default]
    Pending,
    /// Running
    InProgress,
    /// Finished
    Completed,
    /// Failed
    Failed,
    /// Cancelled
    Cancelled,
}

impl TaskStatus {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation
    pub fn parse(value: &str) -> Self {
        match value {
            "in_progress" | "running" => TaskStatus::InProgress,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Pending,
        }
    }
}

/// Scheduled or queued agent task
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task ID, generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Task name
    pub name: String,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Status
    #[serde(default)]
    pub status: TaskStatus,
    /// Owning agent
    pub agent_id: Uuid,
    /// Room scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    /// World scope (required on create)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_id: Option<Uuid>,
    /// Entity the task acts for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last update time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// Partial task update
#[derive(Clone, Debug, Default)]
pub struct TaskUpdate {
    /// New name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New status
    pub status: Option<TaskStatus>,
    /// Replacement tags
    pub tags: Option<Vec<String>>,
    /// Metadata patch, merged shallowly
    pub metadata: Option<Metadata>,
}

/// Append-only log entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    /// Log ID
    pub id: Uuid,
    /// Entity the log belongs to
    pub entity_id: Uuid,
    /// Room scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    /// Log type
    #[serde(rename = "type")]
    pub log_type: String,
    /// Body
    pub body: serde_json::Value,
    /// Creation time
    pub created_at: i64,
}

/// Derived status of an agent run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run started, no terminal event yet
    Started,
    /// Run completed
    Completed,
    /// Run timed out
    Timeout,
    /// Run errored
    Error,
}

impl RunStatus {
    /// Parse a run event status
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "started" => Some(RunStatus::Started),
            "completed" => Some(RunStatus::Completed),
            "timeout" => Some(RunStatus::Timeout),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Timeout => "timeout",
            RunStatus::Error => "error",
        }
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Started)
    }
}

/// Activity counters correlated to a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCounts {
    /// Actions executed
    pub actions: u32,
    /// Model calls
    pub model_calls: u32,
    /// Correlated logs of any type reporting an error or an unsuccessful result
    pub errors: u32,
    /// Evaluator invocations
    pub evaluators: u32,
}

/// Aggregated view of one agent run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Run ID
    pub run_id: String,
    /// Derived status
    pub status: RunStatus,
    /// Earliest start event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// Latest terminal event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    /// Duration in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Triggering message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    /// Room the run happened in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    /// Entity the run acted for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
    /// Metadata from the start event
    #[serde(default)]
    pub metadata: Metadata,
    /// Correlated activity counts
    pub counts: RunCounts,
}

/// One page of run summaries
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummaryPage {
    /// Runs on this page
    pub runs: Vec<RunSummary>,
    /// Total runs matching the filter
    pub total: usize,
    /// Whether more pages exist
    pub has_more: bool,
}

/// Chat transport server
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageServer {
    /// Server ID
    pub id: Uuid,
    /// Name
    pub name: String,
    /// Platform kind
    pub source_type: String,
    /// Platform-side identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last update time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// Channel within a message server
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Channel ID
    pub id: Uuid,
    /// Owning message server
    pub message_server_id: Uuid,
    /// Name
    pub name: String,
    /// Channel kind
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    /// Platform kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    /// Platform-side identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Topic
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last update time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// Partial channel update
#[derive(Clone, Debug, Default)]
pub struct ChannelUpdate {
    /// New name
    pub name: Option<String>,
    /// New topic
    pub topic: Option<String>,
    /// Replacement metadata
    pub metadata: Option<Metadata>,
    /// Replacement participant list
    pub participant_ids: Option<Vec<Uuid>>,
}

/// Message posted to a channel
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message ID
    pub id: Uuid,
    /// Channel
    pub channel_id: Uuid,
    /// Author entity
    pub author_id: Uuid,
    /// Text content
    pub content: String,
    /// Raw platform payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_message: Option<serde_json::Value>,
    /// Root of the reply thread
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to_root_message_id: Option<Uuid>,
    /// Platform kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    /// Platform-side identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last update time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// Deep-merge `patch` into `base`. Nested objects merge recursively and a JSON
/// null in `patch` removes the key.
pub fn merge_metadata(base: &mut Metadata, patch: &Metadata) {
    for (key, value) in patch {
        match value {
            serde_json::Value::Null => {
                base.remove(key);
            }
            serde_json::Value::Object(patch_obj) => match base.get_mut(key) {
                Some(serde_json::Value::Object(base_obj)) => merge_metadata(base_obj, patch_obj),
                _ => {
                    let mut fresh = Metadata::new();
                    merge_metadata(&mut fresh, patch_obj);
                    base.insert(key.clone(), serde_json::Value::Object(fresh));
                }
            },
            other => {
                base.insert(key.clone(), other.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn as_map(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_metadata_nested_and_removal() {
        let mut base = as_map(json!({
            "model": "small",
            "secrets": { "API_KEY": "a", "OTHER": "b" },
            "voice": { "name": "x" }
        }));
        let patch = as_map(json!({
            "model": "large",
            "secrets": { "OTHER": null, "NEW": "c" },
            "voice": null
        }));

        merge_metadata(&mut base, &patch);

        assert_eq!(
            serde_json::Value::Object(base),
            json!({
                "model": "large",
                "secrets": { "API_KEY": "a", "NEW": "c" }
            })
        );
    }

    #[test]
    fn test_fragment_document_id() {
        let doc = Uuid::new_v4();
        let mut memory = Memory::message(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "part");
        assert_eq!(memory.document_id(), None);

        memory.metadata = as_map(json!({ "type": "fragment", "documentId": doc.to_string() }));
        assert_eq!(memory.document_id(), Some(doc));
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Started.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Timeout.is_terminal());
        assert!(RunStatus::Error.is_terminal());
        assert_eq!(RunStatus::parse("timeout"), Some(RunStatus::Timeout));
        assert_eq!(RunStatus::parse("queued"), None);
        assert_eq!(serde_json::to_string(&RunStatus::Completed).unwrap(), "\"completed\"");
    }

    #[test]
    fn test_channel_type_round_trip_names() {
        assert_eq!(ChannelType::parse("VOICE_GROUP"), ChannelType::VoiceGroup);
        assert_eq!(ChannelType::SelfChannel.as_str(), "SELF");
        assert_eq!(ChannelType::parse("unknown"), ChannelType::Dm);
    }
}
