use async_trait::async_trait;
use uuid::Uuid;

use super::json_object;
use crate::base::{GetTasksParams, TaskStore};
use crate::error::{Result, StoreError};
use crate::postgres::context::StoreContext;
use crate::schema::TaskRecord;
use crate::types::{Task, TaskUpdate};

const TASK_COLUMNS: &str = "id, name, description, status, room_id, world_id, entity_id, agent_id, tags, metadata, created_at, updated_at";

/// Agent tasks
#[derive(Clone)]
pub struct PgTaskStore {
    ctx: StoreContext,
}

impl PgTaskStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create_task(&self, task: &Task) -> Result<Uuid> {
        let Some(world_id) = task.world_id else {
            return Err(StoreError::integrity(format!("task '{}' has no world id", task.name)));
        };
        let id = task.id.unwrap_or_else(Uuid::new_v4);

        self.ctx
            .retry("tasks.create", move || async move {
                let mut tx = self.ctx.begin().await?;
                sqlx::query(
                    r#"
                    INSERT INTO tasks (id, name, description, status, room_id, world_id, entity_id, agent_id, tags, metadata)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(id)
                .bind(&task.name)
                .bind(&task.description)
                .bind(task.status.as_str())
                .bind(task.room_id)
                .bind(world_id)
                .bind(task.entity_id)
                .bind(task.agent_id)
                .bind(&task.tags)
                .bind(json_object(&task.metadata))
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(id)
            })
            .await
    }

    async fn get_tasks(&self, params: &GetTasksParams) -> Result<Vec<Task>> {
        let tags = params.tags.as_deref().filter(|t| !t.is_empty());
        self.ctx
            .retry("tasks.list", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, TaskRecord>(&format!(
                    r#"
                    SELECT {TASK_COLUMNS} FROM tasks
                    WHERE ($1::uuid IS NULL OR room_id = $1)
                      AND ($2::uuid IS NULL OR world_id = $2)
                      AND ($3::uuid IS NULL OR entity_id = $3)
                      AND ($4::uuid IS NULL OR agent_id = $4)
                      AND ($5::text[] IS NULL OR tags @> $5)
                    ORDER BY created_at
                    "#
                ))
                .bind(params.room_id)
                .bind(params.world_id)
                .bind(params.entity_id)
                .bind(params.agent_id)
                .bind(tags)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(TaskRecord::to_task).collect())
            })
            .await
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        self.ctx
            .retry("tasks.get", move || async move {
                let mut tx = self.ctx.begin().await?;
                let record = sqlx::query_as::<_, TaskRecord>(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(record.map(|r| r.to_task()))
            })
            .await
    }

    async fn get_tasks_by_name(&self, name: &str) -> Result<Vec<Task>> {
        self.ctx
            .retry("tasks.get_by_name", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, TaskRecord>(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE name = $1 ORDER BY created_at"
                ))
                .bind(name)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(TaskRecord::to_task).collect())
            })
            .await
    }

    async fn update_task(&self, id: Uuid, update: &TaskUpdate) -> Result<bool> {
        self.ctx
            .retry("tasks.update", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query(
                    r#"
                    UPDATE tasks SET
                        name = COALESCE($2, name),
                        description = COALESCE($3, description),
                        status = COALESCE($4, status),
                        tags = COALESCE($5, tags),
                        metadata = CASE WHEN $6::jsonb IS NULL THEN metadata ELSE metadata || $6 END,
                        updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(&update.name)
                .bind(&update.description)
                .bind(update.status.map(|s| s.as_str()))
                .bind(&update.tags)
                .bind(update.metadata.as_ref().map(json_object))
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        self.ctx
            .retry("tasks.delete", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
                    .bind(id)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }
}
