use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use super::json_object;
use crate::base::EntityStore;
use crate::error::Result;
use crate::postgres::context::StoreContext;
use crate::schema::{ComponentRecord, EntityRecord};
use crate::types::{Component, Entity};

const COMPONENT_COLUMNS: &str =
    "id, entity_id, agent_id, room_id, world_id, source_entity_id, type, data, created_at";

/// Entities and their components
#[derive(Clone)]
pub struct PgEntityStore {
    ctx: StoreContext,
}

impl PgEntityStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }
}

/// Fold joined entity/component rows back into entities, keeping row order
fn group_components(rows: Vec<sqlx::postgres::PgRow>, include_components: bool) -> Vec<Entity> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut entities: HashMap<Uuid, Entity> = HashMap::new();

    for row in rows {
        let id: Uuid = row.get("id");
        let entity = entities.entry(id).or_insert_with(|| {
            order.push(id);
            EntityRecord {
                id,
                agent_id: row.get("agent_id"),
                names: row.get("names"),
                metadata: row.get("metadata"),
            }
            .to_entity()
        });

        if !include_components {
            continue;
        }
        let component_id: Option<Uuid> = row.get("component_id");
        if let Some(component_id) = component_id {
            let record = ComponentRecord {
                id: component_id,
                entity_id: id,
                agent_id: row.get("component_agent_id"),
                room_id: row.get("component_room_id"),
                world_id: row.get("component_world_id"),
                source_entity_id: row.get("component_source_entity_id"),
                component_type: row.get("component_type"),
                data: row.get("component_data"),
                created_at: row.get("component_created_at"),
            };
            entity.components.push(record.to_component());
        }
    }

    order
        .into_iter()
        .filter_map(|id| entities.remove(&id))
        .collect()
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn get_entities_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Entity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.ctx
            .retry("entities.get_by_ids", move || async move {
                let mut tx = self.ctx.begin().await?;
                let rows = sqlx::query(
                    r#"
                    SELECT e.id, e.agent_id, e.names, e.metadata,
                           c.id AS component_id, c.agent_id AS component_agent_id,
                           c.room_id AS component_room_id, c.world_id AS component_world_id,
                           c.source_entity_id AS component_source_entity_id,
                           c.type AS component_type, c.data AS component_data,
                           c.created_at AS component_created_at
                    FROM entities e
                    LEFT JOIN components c ON c.entity_id = e.id
                    WHERE e.id = ANY($1)
                    ORDER BY e.created_at, c.created_at
                    "#,
                )
                .bind(ids)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(group_components(rows, true))
            })
            .await
    }

    async fn get_entities_for_room(&self, room_id: Uuid, include_components: bool) -> Result<Vec<Entity>> {
        self.ctx
            .retry("entities.get_for_room", move || async move {
                let mut tx = self.ctx.begin().await?;
                let rows = sqlx::query(
                    r#"
                    SELECT e.id, e.agent_id, e.names, e.metadata,
                           c.id AS component_id, c.agent_id AS component_agent_id,
                           c.room_id AS component_room_id, c.world_id AS component_world_id,
                           c.source_entity_id AS component_source_entity_id,
                           c.type AS component_type, c.data AS component_data,
                           c.created_at AS component_created_at
                    FROM participants p
                    JOIN entities e ON e.id = p.entity_id
                    LEFT JOIN components c ON $2 AND c.entity_id = e.id
                    WHERE p.room_id = $1
                    ORDER BY p.created_at, c.created_at
                    "#,
                )
                .bind(room_id)
                .bind(include_components)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(group_components(rows, include_components))
            })
            .await
    }

    async fn create_entities(&self, entities: &[Entity]) -> Result<bool> {
        if entities.is_empty() {
            return Ok(true);
        }
        self.ctx
            .retry("entities.create", move || async move {
                let mut tx = self.ctx.begin().await?;
                let mut inserted = 0u64;
                for entity in entities {
                    inserted += sqlx::query(
                        r#"
                        INSERT INTO entities (id, agent_id, names, metadata)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (id) DO NOTHING
                        "#,
                    )
                    .bind(entity.id)
                    .bind(entity.agent_id)
                    .bind(&entity.names)
                    .bind(json_object(&entity.metadata))
                    .execute(tx.conn())
                    .await?
                    .rows_affected();
                }
                tx.commit().await?;
                Ok(inserted == entities.len() as u64)
            })
            .await
    }

    async fn update_entity(&self, entity: &Entity) -> Result<bool> {
        self.ctx
            .retry("entities.update", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query(
                    "UPDATE entities SET names = $2, metadata = $3, updated_at = now() WHERE id = $1",
                )
                .bind(entity.id)
                .bind(&entity.names)
                .bind(json_object(&entity.metadata))
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn delete_entity(&self, entity_id: Uuid) -> Result<bool> {
        self.ctx
            .retry("entities.delete", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query("DELETE FROM entities WHERE id = $1")
                    .bind(entity_id)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn get_entities_by_names(&self, names: &[String], agent_id: Uuid) -> Result<Vec<Entity>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        self.ctx
            .retry("entities.get_by_names", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, EntityRecord>(
                    r#"
                    SELECT id, agent_id, names, metadata FROM entities
                    WHERE agent_id = $2 AND names && $1
                    ORDER BY created_at
                    "#,
                )
                .bind(names)
                .bind(agent_id)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(EntityRecord::to_entity).collect())
            })
            .await
    }

    async fn search_entities_by_name(&self, query: &str, agent_id: Uuid, limit: i64) -> Result<Vec<Entity>> {
        self.ctx
            .retry("entities.search", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, EntityRecord>(
                    r#"
                    SELECT id, agent_id, names, metadata FROM entities
                    WHERE agent_id = $2
                      AND EXISTS (SELECT 1 FROM unnest(names) AS n WHERE n ILIKE '%' || $1 || '%')
                    ORDER BY created_at
                    LIMIT $3
                    "#,
                )
                .bind(query)
                .bind(agent_id)
                .bind(limit)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(EntityRecord::to_entity).collect())
            })
            .await
    }

    async fn get_component(
        &self,
        entity_id: Uuid,
        component_type: &str,
        world_id: Option<Uuid>,
        source_entity_id: Option<Uuid>,
    ) -> Result<Option<Component>> {
        self.ctx
            .retry("components.get", move || async move {
                let mut tx = self.ctx.begin().await?;
                let record = sqlx::query_as::<_, ComponentRecord>(&format!(
                    r#"
                    SELECT {COMPONENT_COLUMNS} FROM components
                    WHERE entity_id = $1 AND type = $2
                      AND ($3::uuid IS NULL OR world_id = $3)
                      AND ($4::uuid IS NULL OR source_entity_id = $4)
                    ORDER BY created_at
                    LIMIT 1
                    "#
                ))
                .bind(entity_id)
                .bind(component_type)
                .bind(world_id)
                .bind(source_entity_id)
                .fetch_optional(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(record.map(|r| r.to_component()))
            })
            .await
    }

    async fn get_components(
        &self,
        entity_id: Uuid,
        world_id: Option<Uuid>,
        source_entity_id: Option<Uuid>,
    ) -> Result<Vec<Component>> {
        self.ctx
            .retry("components.list", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, ComponentRecord>(&format!(
                    r#"
                    SELECT {COMPONENT_COLUMNS} FROM components
                    WHERE entity_id = $1
                      AND ($2::uuid IS NULL OR world_id = $2)
                      AND ($3::uuid IS NULL OR source_entity_id = $3)
                    ORDER BY created_at
                    "#
                ))
                .bind(entity_id)
                .bind(world_id)
                .bind(source_entity_id)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(ComponentRecord::to_component).collect())
            })
            .await
    }

    async fn create_component(&self, component: &Component) -> Result<bool> {
        self.ctx
            .retry("components.create", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query(
                    r#"
                    INSERT INTO components (id, entity_id, agent_id, room_id, world_id, source_entity_id, type, data)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(component.id)
                .bind(component.entity_id)
                .bind(component.agent_id)
                .bind(component.room_id)
                .bind(component.world_id)
                .bind(component.source_entity_id)
                .bind(&component.component_type)
                .bind(json_object(&component.data))
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn update_component(&self, component: &Component) -> Result<bool> {
        self.ctx
            .retry("components.update", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query(
                    r#"
                    UPDATE components
                    SET type = $2, data = $3, room_id = $4, world_id = $5, source_entity_id = $6
                    WHERE id = $1
                    "#,
                )
                .bind(component.id)
                .bind(&component.component_type)
                .bind(json_object(&component.data))
                .bind(component.room_id)
                .bind(component.world_id)
                .bind(component.source_entity_id)
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn delete_component(&self, component_id: Uuid) -> Result<bool> {
        self.ctx
            .retry("components.delete", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query("DELETE FROM components WHERE id = $1")
                    .bind(component_id)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }
}
