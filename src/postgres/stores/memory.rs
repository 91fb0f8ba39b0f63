//! Memories and their embeddings.
//!
//! A memory row and its vector are written in the same transaction. The
//! uniqueness probe runs under a transaction-scoped advisory lock keyed on
//! the memory scope, so two writers of near-identical memories into the same
//! room and table serialize and the second one sees the first one's vector.
//!
//! The width an agent's vectors are stored in lives on its `agents` row. The
//! first vector written claims the configured default when none is set, and
//! from then on only [`MemoryStore::migrate_embedding_dimension`] changes it.

use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use tracing::{debug, info};
use uuid::Uuid;

use super::{from_millis, json_object};
use crate::base::{
    EmbeddingSearchResult, GetCachedEmbeddingsParams, GetMemoriesParams, MemoryStore,
    SearchMemoriesParams,
};
use crate::error::{Result, StoreError};
use crate::postgres::context::{IsolatedTx, StoreContext};
use crate::schema::embedding::{similarity_expr, upsert_embedding_sql};
use crate::schema::memory::MEMORY_COLUMNS;
use crate::schema::{EmbeddingDimension, MemoryRecord};
use crate::types::Memory;

/// Cosine similarity at or above which a new memory counts as a duplicate
pub const DUPLICATE_THRESHOLD: f64 = 0.95;
const DEFAULT_MATCH_THRESHOLD: f64 = 0.7;
const DEFAULT_MATCH_COUNT: i64 = 10;

/// Vector rows of agent `$1`. Rows written before `agent_id` existed are
/// matched through their memory.
const OWNED_BY_AGENT: &str =
    "(e.agent_id = $1 OR EXISTS (SELECT 1 FROM memories om WHERE om.id = e.memory_id AND om.agent_id = $1))";

#[derive(sqlx::FromRow)]
struct MemoryRow {
    #[sqlx(flatten)]
    record: MemoryRecord,
    embedding: Option<Vec<f32>>,
    #[sqlx(default)]
    similarity: Option<f64>,
}

impl MemoryRow {
    fn into_memory(self) -> Memory {
        let mut memory = self.record.to_memory();
        memory.embedding = self.embedding;
        memory.similarity = self.similarity;
        memory
    }
}

/// Whichever vector column is populated, as `real[]`
fn embedding_array_expr() -> String {
    let columns = EmbeddingDimension::ALL
        .iter()
        .map(|d| format!("e.{}::real[]", d.column()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("COALESCE({columns})")
}

/// Vector columns other than `dimension`
fn other_columns(dimension: EmbeddingDimension) -> String {
    EmbeddingDimension::ALL
        .iter()
        .filter(|d| **d != dimension)
        .map(|d| format!("e.{}", d.column()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_memories(filter: &str) -> String {
    format!(
        "SELECT {MEMORY_COLUMNS}, {} AS embedding FROM memories m LEFT JOIN embeddings e ON e.memory_id = m.id {filter}",
        embedding_array_expr()
    )
}

/// Width recorded on the agent row, `None` when unset or the agent is unknown
async fn stored_dimension(conn: &mut PgConnection, agent_id: Uuid) -> Result<Option<EmbeddingDimension>> {
    let width: Option<Option<i32>> = sqlx::query_scalar("SELECT embedding_dimension FROM agents WHERE id = $1")
        .bind(agent_id)
        .fetch_optional(conn)
        .await?;
    width
        .flatten()
        .map(|w| EmbeddingDimension::try_from(usize::try_from(w).unwrap_or_default()))
        .transpose()
}

/// Width to write `embedding` in for `agent_id`, claiming `default` for an
/// agent without one. A vector of any other length is rejected.
async fn write_dimension(
    conn: &mut PgConnection,
    agent_id: Uuid,
    default: EmbeddingDimension,
    embedding: &[f32],
) -> Result<EmbeddingDimension> {
    let dimension = match stored_dimension(&mut *conn, agent_id).await? {
        Some(dimension) => dimension,
        None => {
            sqlx::query("UPDATE agents SET embedding_dimension = $2 WHERE id = $1 AND embedding_dimension IS NULL")
                .bind(agent_id)
                .bind(default.width() as i32)
                .execute(&mut *conn)
                .await?;
            // Re-read: a concurrent writer may have claimed another width first
            stored_dimension(&mut *conn, agent_id).await?.unwrap_or(default)
        }
    };
    if embedding.len() != dimension.width() {
        return Err(StoreError::InvalidDimension(embedding.len()));
    }
    Ok(dimension)
}

fn lock_key(memory: &Memory, table_name: &str) -> String {
    format!("memories:{}:{}:{}", memory.agent_id, table_name, memory.room_id)
}

/// Delete `ids` along with any fragments that name them as their document.
/// Vectors go first, then fragments, then the parents.
async fn delete_with_fragments(tx: &mut IsolatedTx, ids: &[Uuid]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let document_ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();

    sqlx::query(
        r#"
        DELETE FROM embeddings
        WHERE memory_id IN (
            SELECT id FROM memories
            WHERE metadata->>'type' = 'fragment' AND metadata->>'documentId' = ANY($1)
        )
        "#,
    )
    .bind(&document_ids)
    .execute(tx.conn())
    .await?;
    let fragments = sqlx::query(
        "DELETE FROM memories WHERE metadata->>'type' = 'fragment' AND metadata->>'documentId' = ANY($1)",
    )
    .bind(&document_ids)
    .execute(tx.conn())
    .await?
    .rows_affected();

    sqlx::query("DELETE FROM embeddings WHERE memory_id = ANY($1)")
        .bind(ids)
        .execute(tx.conn())
        .await?;
    let parents = sqlx::query("DELETE FROM memories WHERE id = ANY($1)")
        .bind(ids)
        .execute(tx.conn())
        .await?
        .rows_affected();

    if fragments > 0 {
        debug!(parents, fragments, "Deleted memories with fragments");
    }
    Ok(parents + fragments)
}

/// Memories, fragments and vectors
#[derive(Clone)]
pub struct PgMemoryStore {
    ctx: StoreContext,
}

impl PgMemoryStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl MemoryStore for PgMemoryStore {
    async fn create_memory(&self, memory: &Memory, table_name: &str) -> Result<Uuid> {
        let id = memory.id.unwrap_or_else(Uuid::new_v4);
        let default = self.ctx.default_dimension();
        let content = serde_json::to_value(&memory.content)?;
        let key = lock_key(memory, table_name);
        let (content, key) = (&content, key.as_str());

        let (inserted, unique) = self
            .ctx
            .retry("memories.create", move || async move {
                let mut tx = self.ctx.begin().await?;
                sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                    .bind(key)
                    .execute(tx.conn())
                    .await?;

                let dimension = match memory.embedding.as_deref() {
                    Some(embedding) => Some(write_dimension(tx.conn(), memory.agent_id, default, embedding).await?),
                    None => None,
                };

                let duplicate = match (dimension, memory.embedding.as_ref()) {
                    (Some(dimension), Some(embedding)) => {
                        sqlx::query_scalar::<_, bool>(&format!(
                            r#"
                            SELECT EXISTS (
                                SELECT 1 FROM embeddings e
                                JOIN memories m ON m.id = e.memory_id
                                WHERE m.agent_id = $2 AND m.type = $3 AND m.room_id = $4
                                  AND e.{column} IS NOT NULL
                                  AND {similarity} >= $5
                            )
                            "#,
                            column = dimension.column(),
                            similarity = similarity_expr(dimension),
                        ))
                        .bind(embedding)
                        .bind(memory.agent_id)
                        .bind(table_name)
                        .bind(memory.room_id)
                        .bind(DUPLICATE_THRESHOLD)
                        .fetch_one(tx.conn())
                        .await?
                    }
                    _ => false,
                };
                let unique = memory.unique.unwrap_or(true) && !duplicate;

                let inserted = sqlx::query(
                    r#"
                    INSERT INTO memories (id, type, content, entity_id, agent_id, room_id, world_id, "unique", metadata, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, now()))
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(id)
                .bind(table_name)
                .bind(content)
                .bind(memory.entity_id)
                .bind(memory.agent_id)
                .bind(memory.room_id)
                .bind(memory.world_id)
                .bind(unique)
                .bind(json_object(&memory.metadata))
                .bind(memory.created_at.map(from_millis))
                .execute(tx.conn())
                .await?
                .rows_affected()
                    > 0;

                if let (true, Some(dimension), Some(embedding)) = (inserted, dimension, memory.embedding.as_ref()) {
                    sqlx::query(&upsert_embedding_sql(dimension))
                        .bind(id)
                        .bind(embedding)
                        .bind(memory.agent_id)
                        .execute(tx.conn())
                        .await?;
                }

                tx.commit().await?;
                Ok((inserted, unique))
            })
            .await?;

        debug!(memory_id = %id, table = table_name, inserted, unique, "Created memory");
        Ok(id)
    }

    async fn get_memories(&self, params: &GetMemoriesParams) -> Result<Vec<Memory>> {
        let sql = select_memories(
            r#"
            WHERE m.type = $1
              AND ($2::uuid IS NULL OR m.entity_id = $2)
              AND ($3::uuid IS NULL OR m.agent_id = $3)
              AND ($4::uuid IS NULL OR m.room_id = $4)
              AND ($5::uuid IS NULL OR m.world_id = $5)
              AND ($6::boolean IS NULL OR m."unique" = $6)
              AND ($7::bigint IS NULL OR m.created_at >= to_timestamp($7 / 1000.0))
              AND ($8::bigint IS NULL OR m.created_at <= to_timestamp($8 / 1000.0))
            ORDER BY m.created_at DESC
            LIMIT $9 OFFSET $10
            "#,
        );
        let sql = sql.as_str();

        self.ctx
            .retry("memories.list", move || async move {
                let mut tx = self.ctx.begin().await?;
                let rows = sqlx::query_as::<_, MemoryRow>(sql)
                    .bind(&params.table_name)
                    .bind(params.entity_id)
                    .bind(params.agent_id)
                    .bind(params.room_id)
                    .bind(params.world_id)
                    .bind(params.unique)
                    .bind(params.start)
                    .bind(params.end)
                    .bind(params.count)
                    .bind(params.offset.unwrap_or(0))
                    .fetch_all(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(rows.into_iter().map(MemoryRow::into_memory).collect())
            })
            .await
    }

    async fn get_memory_by_id(&self, id: Uuid) -> Result<Option<Memory>> {
        let sql = select_memories("WHERE m.id = $1");
        let sql = sql.as_str();

        self.ctx
            .retry("memories.get", move || async move {
                let mut tx = self.ctx.begin().await?;
                let row = sqlx::query_as::<_, MemoryRow>(sql)
                    .bind(id)
                    .fetch_optional(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(row.map(MemoryRow::into_memory))
            })
            .await
    }

    async fn get_memories_by_ids(&self, ids: &[Uuid], table_name: Option<&str>) -> Result<Vec<Memory>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = select_memories(
            "WHERE m.id = ANY($1) AND ($2::text IS NULL OR m.type = $2) ORDER BY m.created_at DESC",
        );
        let sql = sql.as_str();

        self.ctx
            .retry("memories.get_by_ids", move || async move {
                let mut tx = self.ctx.begin().await?;
                let rows = sqlx::query_as::<_, MemoryRow>(sql)
                    .bind(ids)
                    .bind(table_name)
                    .fetch_all(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(rows.into_iter().map(MemoryRow::into_memory).collect())
            })
            .await
    }

    async fn get_memories_by_room_ids(&self, table_name: &str, room_ids: &[Uuid], limit: Option<i64>) -> Result<Vec<Memory>> {
        if room_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = select_memories(
            "WHERE m.type = $1 AND m.room_id = ANY($2) ORDER BY m.created_at DESC LIMIT $3",
        );
        let sql = sql.as_str();

        self.ctx
            .retry("memories.get_by_rooms", move || async move {
                let mut tx = self.ctx.begin().await?;
                let rows = sqlx::query_as::<_, MemoryRow>(sql)
                    .bind(table_name)
                    .bind(room_ids)
                    .bind(limit)
                    .fetch_all(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(rows.into_iter().map(MemoryRow::into_memory).collect())
            })
            .await
    }

    async fn get_memories_by_world_id(&self, world_id: Uuid, table_name: Option<&str>, count: Option<i64>) -> Result<Vec<Memory>> {
        let sql = select_memories(
            "WHERE m.world_id = $1 AND ($2::text IS NULL OR m.type = $2) ORDER BY m.created_at DESC LIMIT $3",
        );
        let sql = sql.as_str();

        self.ctx
            .retry("memories.get_by_world", move || async move {
                let mut tx = self.ctx.begin().await?;
                let rows = sqlx::query_as::<_, MemoryRow>(sql)
                    .bind(world_id)
                    .bind(table_name)
                    .bind(count)
                    .fetch_all(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(rows.into_iter().map(MemoryRow::into_memory).collect())
            })
            .await
    }

    async fn search_memories(&self, params: &SearchMemoriesParams) -> Result<Vec<Memory>> {
        let dimension = EmbeddingDimension::of(&params.embedding)?;
        let similarity = similarity_expr(dimension);
        let sql = format!(
            r#"
            SELECT {MEMORY_COLUMNS}, e.{column}::real[] AS embedding, {similarity} AS similarity
            FROM embeddings e
            JOIN memories m ON m.id = e.memory_id
            WHERE m.type = $2
              AND e.{column} IS NOT NULL
              AND ($3::uuid IS NULL OR m.agent_id = $3)
              AND ($4::uuid IS NULL OR m.room_id = $4)
              AND ($5::uuid IS NULL OR m.world_id = $5)
              AND ($6::uuid IS NULL OR m.entity_id = $6)
              AND ($7::boolean IS NULL OR m."unique" = $7)
              AND {similarity} >= $8
            ORDER BY similarity DESC
            LIMIT $9
            "#,
            column = dimension.column(),
        );
        let sql = sql.as_str();

        self.ctx
            .retry("memories.search", move || async move {
                let mut tx = self.ctx.begin().await?;
                let rows = sqlx::query_as::<_, MemoryRow>(sql)
                    .bind(&params.embedding)
                    .bind(&params.table_name)
                    .bind(params.agent_id)
                    .bind(params.room_id)
                    .bind(params.world_id)
                    .bind(params.entity_id)
                    .bind(params.unique)
                    .bind(params.match_threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD))
                    .bind(params.count.unwrap_or(DEFAULT_MATCH_COUNT))
                    .fetch_all(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(rows.into_iter().map(MemoryRow::into_memory).collect())
            })
            .await
    }

    async fn get_cached_embeddings(&self, params: &GetCachedEmbeddingsParams) -> Result<Vec<EmbeddingSearchResult>> {
        let vector = embedding_array_expr();
        let sql = format!(
            r#"
            SELECT m.id, {vector} AS embedding
            FROM memories m
            JOIN embeddings e ON e.memory_id = m.id
            WHERE m.type = $1
              AND ($2::uuid IS NULL OR m.agent_id = $2)
              AND {vector} IS NOT NULL
            ORDER BY m.created_at DESC
            LIMIT $3
            "#
        );
        let sql = sql.as_str();

        self.ctx
            .retry("memories.cached_embeddings", move || async move {
                let mut tx = self.ctx.begin().await?;
                let rows: Vec<(Uuid, Vec<f32>)> = sqlx::query_as(sql)
                    .bind(&params.table_name)
                    .bind(params.agent_id)
                    .bind(params.match_count.unwrap_or(DEFAULT_MATCH_COUNT))
                    .fetch_all(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(rows
                    .into_iter()
                    .map(|(memory_id, embedding)| EmbeddingSearchResult { memory_id, embedding })
                    .collect())
            })
            .await
    }

    async fn update_memory(&self, memory: &Memory) -> Result<bool> {
        let Some(id) = memory.id else {
            return Ok(false);
        };
        let default = self.ctx.default_dimension();
        let content = serde_json::to_value(&memory.content)?;
        let content = &content;

        self.ctx
            .retry("memories.update", move || async move {
                let mut tx = self.ctx.begin().await?;
                let updated = sqlx::query("UPDATE memories SET content = $2, metadata = $3 WHERE id = $1")
                    .bind(id)
                    .bind(content)
                    .bind(json_object(&memory.metadata))
                    .execute(tx.conn())
                    .await?
                    .rows_affected()
                    > 0;

                if let (true, Some(embedding)) = (updated, memory.embedding.as_deref()) {
                    let dimension = write_dimension(tx.conn(), memory.agent_id, default, embedding).await?;
                    sqlx::query(&upsert_embedding_sql(dimension))
                        .bind(id)
                        .bind(embedding)
                        .bind(memory.agent_id)
                        .execute(tx.conn())
                        .await?;
                }

                tx.commit().await?;
                Ok(updated)
            })
            .await
    }

    async fn delete_memory(&self, memory_id: Uuid) -> Result<()> {
        self.delete_many_memories(&[memory_id]).await
    }

    async fn delete_many_memories(&self, memory_ids: &[Uuid]) -> Result<()> {
        if memory_ids.is_empty() {
            return Ok(());
        }
        self.ctx
            .retry("memories.delete", move || async move {
                let mut tx = self.ctx.begin().await?;
                delete_with_fragments(&mut tx, memory_ids).await?;
                tx.commit().await?;
                Ok(())
            })
            .await
    }

    async fn delete_all_memories(&self, room_id: Uuid, table_name: &str) -> Result<()> {
        let deleted = self
            .ctx
            .retry("memories.delete_all", move || async move {
                let mut tx = self.ctx.begin().await?;
                let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM memories WHERE room_id = $1 AND type = $2")
                    .bind(room_id)
                    .bind(table_name)
                    .fetch_all(tx.conn())
                    .await?;
                let deleted = delete_with_fragments(&mut tx, &ids).await?;
                tx.commit().await?;
                Ok(deleted)
            })
            .await?;

        debug!(room_id = %room_id, table = table_name, deleted, "Deleted room memories");
        Ok(())
    }

    async fn count_memories(&self, room_id: Uuid, unique: bool, table_name: Option<&str>) -> Result<i64> {
        self.ctx
            .retry("memories.count", move || async move {
                let mut tx = self.ctx.begin().await?;
                let count: i64 = sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*) FROM memories
                    WHERE room_id = $1
                      AND (NOT $2 OR "unique")
                      AND ($3::text IS NULL OR type = $3)
                    "#,
                )
                .bind(room_id)
                .bind(unique)
                .bind(table_name)
                .fetch_one(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(count)
            })
            .await
    }

    async fn get_embedding_dimension(&self, agent_id: Uuid) -> Result<EmbeddingDimension> {
        let stored = self
            .ctx
            .retry("memories.get_dimension", move || async move {
                let mut tx = self.ctx.begin().await?;
                let stored = stored_dimension(tx.conn(), agent_id).await?;
                tx.commit().await?;
                Ok(stored)
            })
            .await?;
        Ok(stored.unwrap_or(self.ctx.default_dimension()))
    }

    async fn ensure_embedding_dimension(&self, agent_id: Uuid, dimension: EmbeddingDimension) -> Result<()> {
        let conflict_sql = format!(
            "SELECT EXISTS (SELECT 1 FROM embeddings e WHERE {OWNED_BY_AGENT} AND num_nonnulls({}) > 0)",
            other_columns(dimension)
        );
        let conflict_sql = conflict_sql.as_str();

        let changed = self
            .ctx
            .retry("memories.ensure_dimension", move || async move {
                let mut tx = self.ctx.begin().await?;
                let stored: Option<Option<i32>> =
                    sqlx::query_scalar("SELECT embedding_dimension FROM agents WHERE id = $1 FOR UPDATE")
                        .bind(agent_id)
                        .fetch_optional(tx.conn())
                        .await?;
                let Some(stored) = stored else {
                    return Err(StoreError::not_found(format!("agent {agent_id}")));
                };
                if stored == Some(dimension.width() as i32) {
                    tx.commit().await?;
                    return Ok(false);
                }

                let conflicting: bool = sqlx::query_scalar(conflict_sql)
                    .bind(agent_id)
                    .fetch_one(tx.conn())
                    .await?;
                if conflicting {
                    return Err(StoreError::integrity(format!(
                        "agent {agent_id} has embeddings of another width; migrate them before switching to {}",
                        dimension.width()
                    )));
                }

                sqlx::query("UPDATE agents SET embedding_dimension = $2 WHERE id = $1")
                    .bind(agent_id)
                    .bind(dimension.width() as i32)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(true)
            })
            .await?;

        if changed {
            debug!(agent_id = %agent_id, dimension = dimension.width(), "Embedding dimension set");
        }
        Ok(())
    }

    async fn migrate_embedding_dimension(&self, agent_id: Uuid, dimension: EmbeddingDimension) -> Result<u64> {
        let sql = format!(
            "DELETE FROM embeddings e WHERE {OWNED_BY_AGENT} AND num_nonnulls({}) > 0",
            other_columns(dimension)
        );
        let sql = sql.as_str();

        let removed = self
            .ctx
            .retry("memories.migrate_dimension", move || async move {
                let mut tx = self.ctx.begin().await?;
                let removed = sqlx::query(sql)
                    .bind(agent_id)
                    .execute(tx.conn())
                    .await?
                    .rows_affected();
                let updated = sqlx::query("UPDATE agents SET embedding_dimension = $2 WHERE id = $1")
                    .bind(agent_id)
                    .bind(dimension.width() as i32)
                    .execute(tx.conn())
                    .await?
                    .rows_affected();
                if updated == 0 {
                    return Err(StoreError::not_found(format!("agent {agent_id}")));
                }
                tx.commit().await?;
                Ok(removed)
            })
            .await?;

        info!(agent_id = %agent_id, dimension = dimension.width(), removed, "Migrated embedding dimension");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_array_covers_every_width() {
        let expr = embedding_array_expr();
        for dimension in EmbeddingDimension::ALL {
            assert!(expr.contains(&format!("e.{}::real[]", dimension.column())));
        }
        assert!(expr.starts_with("COALESCE("));
    }

    #[test]
    fn test_other_columns_excludes_selected() {
        let others = other_columns(EmbeddingDimension::Dim768);
        assert!(!others.contains("dim_768"));
        assert_eq!(others.split(", ").count(), EmbeddingDimension::ALL.len() - 1);
    }

    #[test]
    fn test_agent_filter_covers_legacy_vectors() {
        assert!(OWNED_BY_AGENT.contains("e.agent_id = $1"));
        assert!(OWNED_BY_AGENT.contains("om.agent_id = $1"));
    }

    #[test]
    fn test_lock_key_is_scoped() {
        let agent = Uuid::new_v4();
        let room = Uuid::new_v4();
        let memory = Memory::message(agent, Uuid::new_v4(), room, "hello");
        assert_eq!(lock_key(&memory, "messages"), format!("memories:{agent}:messages:{room}"));
        assert_ne!(lock_key(&memory, "messages"), lock_key(&memory, "documents"));
    }
}
