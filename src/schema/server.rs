#![allow(missing_docs)]
//! Tenant registry schema

/// One row per deployment instance sharing the database
pub const CREATE_SERVERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS servers (
    id UUID PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const UPSERT_SERVER: &str = r#"
INSERT INTO servers (id) VALUES ($1)
ON CONFLICT (id) DO UPDATE SET updated_at = now()
"#;
