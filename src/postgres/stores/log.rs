use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::base::{GetLogsParams, LogParams, LogStore};
use crate::error::Result;
use crate::postgres::context::StoreContext;
use crate::runs::{run_id_of, summarize_runs, RunQuery};
use crate::schema::log::RUN_EVENT;
use crate::schema::LogRecord;
use crate::types::{Log, RunSummaryPage};

const LOG_COLUMNS: &str = "id, created_at, entity_id, body, type, room_id";

/// Append-only logs and the run summaries derived from them
#[derive(Clone)]
pub struct PgLogStore {
    ctx: StoreContext,
}

impl PgLogStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl LogStore for PgLogStore {
    async fn log(&self, params: &LogParams) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.ctx
            .retry("logs.create", move || async move {
                let mut tx = self.ctx.begin().await?;
                sqlx::query(
                    "INSERT INTO logs (id, entity_id, room_id, body, type) VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(id)
                .bind(params.entity_id)
                .bind(params.room_id)
                .bind(&params.body)
                .bind(&params.log_type)
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(id)
            })
            .await
    }

    async fn get_logs(&self, params: &GetLogsParams) -> Result<Vec<Log>> {
        self.ctx
            .retry("logs.list", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, LogRecord>(&format!(
                    r#"
                    SELECT {LOG_COLUMNS} FROM logs
                    WHERE ($1::uuid IS NULL OR entity_id = $1)
                      AND ($2::uuid IS NULL OR room_id = $2)
                      AND ($3::text IS NULL OR type = $3)
                      AND ($4::bigint IS NULL OR created_at >= to_timestamp($4 / 1000.0))
                      AND ($5::bigint IS NULL OR created_at <= to_timestamp($5 / 1000.0))
                    ORDER BY created_at DESC
                    LIMIT $6 OFFSET $7
                    "#
                ))
                .bind(params.entity_id)
                .bind(params.room_id)
                .bind(&params.log_type)
                .bind(params.start)
                .bind(params.end)
                .bind(params.count)
                .bind(params.offset.unwrap_or(0))
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(LogRecord::to_log).collect())
            })
            .await
    }

    async fn delete_log(&self, log_id: Uuid) -> Result<bool> {
        self.ctx
            .retry("logs.delete", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query("DELETE FROM logs WHERE id = $1")
                    .bind(log_id)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn get_agent_run_summaries(&self, agent_id: Uuid, query: &RunQuery) -> Result<RunSummaryPage> {
        let logs = self
            .ctx
            .retry("logs.run_summaries", move || async move {
                let mut tx = self.ctx.begin().await?;

                let events = sqlx::query_as::<_, LogRecord>(&format!(
                    "SELECT {LOG_COLUMNS} FROM logs WHERE entity_id = $1 AND type = $2 ORDER BY created_at"
                ))
                .bind(agent_id)
                .bind(RUN_EVENT)
                .fetch_all(tx.conn())
                .await?;

                let mut run_ids: Vec<String> = events
                    .iter()
                    .filter_map(|r| run_id_of(&r.body).map(str::to_string))
                    .collect();
                run_ids.sort();
                run_ids.dedup();

                let activity = if run_ids.is_empty() {
                    Vec::new()
                } else {
                    sqlx::query_as::<_, LogRecord>(&format!(
                        "SELECT {LOG_COLUMNS} FROM logs WHERE body->>'runId' = ANY($1) AND type <> $2"
                    ))
                    .bind(&run_ids)
                    .bind(RUN_EVENT)
                    .fetch_all(tx.conn())
                    .await?
                };

                tx.commit().await?;
                Ok(events
                    .iter()
                    .chain(activity.iter())
                    .map(LogRecord::to_log)
                    .collect::<Vec<_>>())
            })
            .await?;

        let page = summarize_runs(&logs, query);
        debug!(agent_id = %agent_id, total = page.total, returned = page.runs.len(), "Summarized runs");
        Ok(page)
    }
}
