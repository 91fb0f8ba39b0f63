use async_trait::async_trait;
use uuid::Uuid;

use crate::base::CacheStore;
use crate::error::Result;
use crate::postgres::context::StoreContext;

/// Per-agent key/value cache with optional expiry
#[derive(Clone)]
pub struct PgCacheStore {
    ctx: StoreContext,
}

impl PgCacheStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get_cache(&self, agent_id: Uuid, key: &str) -> Result<Option<serde_json::Value>> {
        self.ctx
            .retry("cache.get", move || async move {
                let mut tx = self.ctx.begin().await?;
                let value: Option<serde_json::Value> = sqlx::query_scalar(
                    r#"
                    SELECT value FROM cache
                    WHERE agent_id = $1 AND key = $2
                      AND (expires_at IS NULL OR expires_at > now())
                    "#,
                )
                .bind(agent_id)
                .bind(key)
                .fetch_optional(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(value)
            })
            .await
    }

    async fn set_cache(&self, agent_id: Uuid, key: &str, value: &serde_json::Value, ttl_ms: Option<i64>) -> Result<bool> {
        self.ctx
            .retry("cache.set", move || async move {
                let mut tx = self.ctx.begin().await?;
                sqlx::query(
                    r#"
                    INSERT INTO cache (key, agent_id, value, created_at, expires_at)
                    VALUES ($1, $2, $3, now(), now() + make_interval(secs => $4::bigint / 1000.0))
                    ON CONFLICT (key, agent_id)
                    DO UPDATE SET value = EXCLUDED.value, created_at = now(), expires_at = EXCLUDED.expires_at
                    "#,
                )
                .bind(key)
                .bind(agent_id)
                .bind(value)
                .bind(ttl_ms)
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(true)
            })
            .await
    }

    async fn delete_cache(&self, agent_id: Uuid, key: &str) -> Result<bool> {
        self.ctx
            .retry("cache.delete", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query("DELETE FROM cache WHERE agent_id = $1 AND key = $2")
                    .bind(agent_id)
                    .bind(key)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }
}
