use async_trait::async_trait;
use uuid::Uuid;

use super::json_object;
use crate::base::{CreateRelationshipParams, GetRelationshipsParams, RelationshipStore};
use crate::error::Result;
use crate::postgres::context::StoreContext;
use crate::schema::RelationshipRecord;
use crate::types::Relationship;

const RELATIONSHIP_COLUMNS: &str =
    "id, created_at, source_entity_id, target_entity_id, agent_id, tags, metadata";

/// Directed entity relationships
#[derive(Clone)]
pub struct PgRelationshipStore {
    ctx: StoreContext,
}

impl PgRelationshipStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RelationshipStore for PgRelationshipStore {
    async fn create_relationship(&self, params: &CreateRelationshipParams) -> Result<bool> {
        self.ctx
            .retry("relationships.create", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query(
                    r#"
                    INSERT INTO relationships (id, source_entity_id, target_entity_id, agent_id, tags, metadata)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (source_entity_id, target_entity_id, agent_id) DO NOTHING
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(params.source_entity_id)
                .bind(params.target_entity_id)
                .bind(params.agent_id)
                .bind(&params.tags)
                .bind(json_object(&params.metadata))
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn update_relationship(&self, relationship: &Relationship) -> Result<bool> {
        self.ctx
            .retry("relationships.update", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query("UPDATE relationships SET tags = $2, metadata = $3 WHERE id = $1")
                    .bind(relationship.id)
                    .bind(&relationship.tags)
                    .bind(json_object(&relationship.metadata))
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn get_relationship(
        &self,
        source_entity_id: Uuid,
        target_entity_id: Uuid,
        tags: Option<&[String]>,
    ) -> Result<Option<Relationship>> {
        let tags = tags.filter(|t| !t.is_empty());
        self.ctx
            .retry("relationships.get", move || async move {
                let mut tx = self.ctx.begin().await?;
                let record = sqlx::query_as::<_, RelationshipRecord>(&format!(
                    r#"
                    SELECT {RELATIONSHIP_COLUMNS} FROM relationships
                    WHERE source_entity_id = $1 AND target_entity_id = $2
                      AND ($3::text[] IS NULL OR tags && $3)
                    ORDER BY created_at
                    LIMIT 1
                    "#
                ))
                .bind(source_entity_id)
                .bind(target_entity_id)
                .bind(tags)
                .fetch_optional(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(record.map(|r| r.to_relationship()))
            })
            .await
    }

    async fn get_relationships(&self, params: &GetRelationshipsParams) -> Result<Vec<Relationship>> {
        let tags = params.tags.as_deref().filter(|t| !t.is_empty());
        self.ctx
            .retry("relationships.list", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, RelationshipRecord>(&format!(
                    r#"
                    SELECT {RELATIONSHIP_COLUMNS} FROM relationships
                    WHERE (source_entity_id = $1 OR target_entity_id = $1)
                      AND ($2::text[] IS NULL OR tags && $2)
                    ORDER BY created_at
                    "#
                ))
                .bind(params.entity_id)
                .bind(tags)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(RelationshipRecord::to_relationship).collect())
            })
            .await
    }
}
