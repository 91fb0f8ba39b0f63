#![allow(missing_docs)]
//! Embedding schema
//!
//! One row per memory. Each supported width has its own nullable vector
//! column and at most one of them is populated.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Supported embedding widths
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum EmbeddingDimension {
    #[default]
    Dim384,
    Dim512,
    Dim768,
    Dim1024,
    Dim1536,
    Dim3072,
}

impl EmbeddingDimension {
    /// All supported widths, smallest first
    pub const ALL: [EmbeddingDimension; 6] = [
        EmbeddingDimension::Dim384,
        EmbeddingDimension::Dim512,
        EmbeddingDimension::Dim768,
        EmbeddingDimension::Dim1024,
        EmbeddingDimension::Dim1536,
        EmbeddingDimension::Dim3072,
    ];

    /// Vector width
    pub fn width(&self) -> usize {
        match self {
            EmbeddingDimension::Dim384 => 384,
            EmbeddingDimension::Dim512 => 512,
            EmbeddingDimension::Dim768 => 768,
            EmbeddingDimension::Dim1024 => 1024,
            EmbeddingDimension::Dim1536 => 1536,
            EmbeddingDimension::Dim3072 => 3072,
        }
    }

    /// Column holding vectors of this width
    pub fn column(&self) -> &'static str {
        match self {
            EmbeddingDimension::Dim384 => "dim_384",
            EmbeddingDimension::Dim512 => "dim_512",
            EmbeddingDimension::Dim768 => "dim_768",
            EmbeddingDimension::Dim1024 => "dim_1024",
            EmbeddingDimension::Dim1536 => "dim_1536",
            EmbeddingDimension::Dim3072 => "dim_3072",
        }
    }

    /// Dimension matching the length of `embedding`
    pub fn of(embedding: &[f32]) -> Result<Self, StoreError> {
        Self::try_from(embedding.len())
    }
}

impl TryFrom<usize> for EmbeddingDimension {
    type Error = StoreError;

    fn try_from(width: usize) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|d| d.width() == width)
            .ok_or(StoreError::InvalidDimension(width))
    }
}

impl From<EmbeddingDimension> for usize {
    fn from(dimension: EmbeddingDimension) -> usize {
        dimension.width()
    }
}

pub const ENSURE_VECTOR_EXTENSION: &str = "CREATE EXTENSION IF NOT EXISTS vector";

pub const CREATE_EMBEDDINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS embeddings (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    memory_id UUID NOT NULL UNIQUE REFERENCES memories(id) ON DELETE CASCADE,
    agent_id UUID REFERENCES agents(id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    dim_384 vector(384),
    dim_512 vector(512),
    dim_768 vector(768),
    dim_1024 vector(1024),
    dim_1536 vector(1536),
    dim_3072 vector(3072),
    CONSTRAINT embedding_source_check CHECK (
        num_nonnulls(dim_384, dim_512, dim_768, dim_1024, dim_1536, dim_3072) <= 1
    )
)
"#;

/// Owning agent on the vector row, so width checks need not see memories
pub const ADD_EMBEDDINGS_AGENT_ID: &str = r#"
ALTER TABLE embeddings ADD COLUMN IF NOT EXISTS agent_id UUID REFERENCES agents(id) ON DELETE CASCADE;
CREATE INDEX IF NOT EXISTS idx_embeddings_agent_id ON embeddings (agent_id);
"#;

/// HNSW indexes. pgvector caps HNSW at 2000 dimensions, so 3072 is scanned.
pub const CREATE_EMBEDDINGS_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_embeddings_dim_384 ON embeddings USING hnsw (dim_384 vector_cosine_ops)",
    "CREATE INDEX IF NOT EXISTS idx_embeddings_dim_512 ON embeddings USING hnsw (dim_512 vector_cosine_ops)",
    "CREATE INDEX IF NOT EXISTS idx_embeddings_dim_768 ON embeddings USING hnsw (dim_768 vector_cosine_ops)",
    "CREATE INDEX IF NOT EXISTS idx_embeddings_dim_1024 ON embeddings USING hnsw (dim_1024 vector_cosine_ops)",
    "CREATE INDEX IF NOT EXISTS idx_embeddings_dim_1536 ON embeddings USING hnsw (dim_1536 vector_cosine_ops)",
];

/// Upsert the vector for one memory into the column for `dimension`.
///
/// Binds: `$1` memory id, `$2` the vector as `real[]`, `$3` agent id.
pub fn upsert_embedding_sql(dimension: EmbeddingDimension) -> String {
    let column = dimension.column();
    let width = dimension.width();
    let others = EmbeddingDimension::ALL
        .iter()
        .filter(|d| **d != dimension)
        .map(|d| format!("{} = NULL", d.column()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"
INSERT INTO embeddings (memory_id, agent_id, {column})
VALUES ($1, $3, $2::vector({width}))
ON CONFLICT (memory_id) DO UPDATE SET {column} = EXCLUDED.{column}, agent_id = EXCLUDED.agent_id, {others}
"#
    )
}

/// Similarity expression against the `$1` query vector
pub fn similarity_expr(dimension: EmbeddingDimension) -> String {
    format!(
        "1 - (e.{} <=> $1::vector({}))",
        dimension.column(),
        dimension.width()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_lookup() {
        assert_eq!(EmbeddingDimension::try_from(768usize).unwrap(), EmbeddingDimension::Dim768);
        assert_eq!(EmbeddingDimension::of(&[0.0; 512]).unwrap().column(), "dim_512");
        assert!(matches!(
            EmbeddingDimension::try_from(100usize),
            Err(StoreError::InvalidDimension(100))
        ));
    }

    #[test]
    fn test_dimension_serde_as_number() {
        let json = serde_json::to_string(&EmbeddingDimension::Dim1536).unwrap();
        assert_eq!(json, "1536");
        let parsed: EmbeddingDimension = serde_json::from_str("3072").unwrap();
        assert_eq!(parsed, EmbeddingDimension::Dim3072);
        assert!(serde_json::from_str::<EmbeddingDimension>("42").is_err());
    }

    #[test]
    fn test_upsert_clears_other_columns() {
        let sql = upsert_embedding_sql(EmbeddingDimension::Dim768);
        assert!(sql.contains("INSERT INTO embeddings (memory_id, agent_id, dim_768)"));
        assert!(sql.contains("agent_id = EXCLUDED.agent_id"));
        assert!(sql.contains("$2::vector(768)"));
        assert!(sql.contains("dim_384 = NULL"));
        assert!(!sql.contains("dim_768 = NULL"));
    }
}
