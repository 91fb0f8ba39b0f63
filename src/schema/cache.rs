#![allow(missing_docs)]
//! Cache schema

pub const CREATE_CACHE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cache (
    key TEXT NOT NULL,
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    value JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    expires_at TIMESTAMPTZ,
    PRIMARY KEY (key, agent_id)
)
"#;

pub const CREATE_CACHE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_cache_expires_at ON cache (expires_at);
"#;
