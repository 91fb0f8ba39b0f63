#![allow(missing_docs)]
//! Agent schema

use crate::types::Agent;

pub const CREATE_AGENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    enabled BOOLEAN NOT NULL DEFAULT true,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    name TEXT NOT NULL,
    username TEXT,
    bio JSONB NOT NULL DEFAULT '[]'::jsonb,
    settings JSONB NOT NULL DEFAULT '{}'::jsonb,
    embedding_dimension INTEGER
)
"#;

/// Width the agent's embeddings are stored in, NULL until chosen
pub const ADD_AGENTS_EMBEDDING_DIMENSION: &str =
    "ALTER TABLE agents ADD COLUMN IF NOT EXISTS embedding_dimension INTEGER";

pub const CREATE_AGENTS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_agents_enabled ON agents (enabled);
"#;

/// Agent row
#[derive(Clone, Debug)]
#[cfg_attr(feature = "native", derive(sqlx::FromRow))]
pub struct AgentRecord {
    pub id: uuid::Uuid,
    pub enabled: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub name: String,
    pub username: Option<String>,
    pub bio: serde_json::Value,
    pub settings: serde_json::Value,
}

impl AgentRecord {
    pub fn to_agent(&self) -> Agent {
        Agent {
            id: self.id,
            name: self.name.clone(),
            username: self.username.clone(),
            bio: bio_lines(&self.bio),
            settings: self.settings.as_object().cloned().unwrap_or_default(),
            enabled: self.enabled,
            created_at: Some(self.created_at.timestamp_millis()),
            updated_at: Some(self.updated_at.timestamp_millis()),
        }
    }
}

/// Bio is stored either as a single string or a list of lines.
fn bio_lines(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bio_accepts_string_or_list() {
        assert_eq!(bio_lines(&json!("single")), vec!["single".to_string()]);
        assert_eq!(bio_lines(&json!(["a", 1, "b"])), vec!["a".to_string(), "b".to_string()]);
        assert!(bio_lines(&json!(null)).is_empty());
    }
}
