use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::json_object;
use crate::base::AgentStore;
use crate::error::Result;
use crate::postgres::context::StoreContext;
use crate::schema::AgentRecord;
use crate::types::{merge_metadata, Agent, AgentUpdate};

const AGENT_COLUMNS: &str = "id, enabled, created_at, updated_at, name, username, bio, settings";

/// Agent rows
#[derive(Clone)]
pub struct PgAgentStore {
    ctx: StoreContext,
}

impl PgAgentStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl AgentStore for PgAgentStore {
    async fn get_agent(&self, agent_id: Uuid) -> Result<Option<Agent>> {
        self.ctx
            .retry("agents.get", move || async move {
                let mut tx = self.ctx.begin().await?;
                let record = sqlx::query_as::<_, AgentRecord>(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"
                ))
                .bind(agent_id)
                .fetch_optional(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(record.map(|r| r.to_agent()))
            })
            .await
    }

    async fn get_agents(&self) -> Result<Vec<Agent>> {
        self.ctx
            .retry("agents.list", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, AgentRecord>(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents ORDER BY created_at"
                ))
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(AgentRecord::to_agent).collect())
            })
            .await
    }

    async fn create_agent(&self, agent: &Agent) -> Result<bool> {
        let bio = serde_json::to_value(&agent.bio)?;
        let settings = json_object(&agent.settings);
        let (bio, settings) = (&bio, &settings);

        let inserted = self
            .ctx
            .retry("agents.create", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query(
                    r#"
                    INSERT INTO agents (id, enabled, name, username, bio, settings)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(agent.id)
                .bind(agent.enabled)
                .bind(&agent.name)
                .bind(&agent.username)
                .bind(bio)
                .bind(settings)
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await?;

        debug!(agent_id = %agent.id, inserted, "Created agent");
        Ok(inserted)
    }

    async fn update_agent(&self, agent_id: Uuid, update: &AgentUpdate) -> Result<bool> {
        self.ctx
            .retry("agents.update", move || async move {
                let mut tx = self.ctx.begin().await?;

                // Lock the row so concurrent settings merges do not lose keys.
                let current = sqlx::query_as::<_, AgentRecord>(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1 FOR UPDATE"
                ))
                .bind(agent_id)
                .fetch_optional(tx.conn())
                .await?;
                let Some(current) = current else {
                    tx.rollback().await?;
                    return Ok(false);
                };

                let mut agent = current.to_agent();
                if let Some(name) = &update.name {
                    agent.name = name.clone();
                }
                if let Some(username) = &update.username {
                    agent.username = Some(username.clone());
                }
                if let Some(bio) = &update.bio {
                    agent.bio = bio.clone();
                }
                if let Some(enabled) = update.enabled {
                    agent.enabled = enabled;
                }
                if let Some(patch) = &update.settings {
                    merge_metadata(&mut agent.settings, patch);
                }

                sqlx::query(
                    r#"
                    UPDATE agents
                    SET name = $2, username = $3, bio = $4, settings = $5, enabled = $6, updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(agent_id)
                .bind(&agent.name)
                .bind(&agent.username)
                .bind(serde_json::to_value(&agent.bio)?)
                .bind(json_object(&agent.settings))
                .bind(agent.enabled)
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(true)
            })
            .await
    }

    async fn delete_agent(&self, agent_id: Uuid) -> Result<bool> {
        self.ctx
            .retry("agents.delete", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query("DELETE FROM agents WHERE id = $1")
                    .bind(agent_id)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn count_agents(&self) -> Result<i64> {
        self.ctx
            .retry("agents.count", move || async move {
                let mut tx = self.ctx.begin().await?;
                let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agents")
                    .fetch_one(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(count)
            })
            .await
    }
}
