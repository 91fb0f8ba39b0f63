use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::json_object;
use crate::base::{CreateChannelParams, CreateMessageParams, MessagingStore};
use crate::error::{Result, StoreError};
use crate::postgres::context::{IsolatedTx, StoreContext};
use crate::schema::messaging::dm_channel_name;
use crate::schema::{ChannelRecord, MessageRecord, MessageServerRecord};
use crate::types::{Channel, ChannelType, ChannelUpdate, Message, MessageServer};

const SERVER_COLUMNS: &str = "id, name, source_type, source_id, metadata, created_at, updated_at";
const CHANNEL_COLUMNS: &str =
    "id, message_server_id, name, type, source_type, source_id, topic, metadata, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, channel_id, author_id, content, raw_message, in_reply_to_root_message_id, source_type, source_id, metadata, created_at, updated_at";

async fn insert_channel(tx: &mut IsolatedTx, id: Uuid, params: &CreateChannelParams) -> Result<ChannelRecord> {
    let record = sqlx::query_as::<_, ChannelRecord>(&format!(
        r#"
        INSERT INTO channels (id, message_server_id, name, type, source_type, source_id, topic, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {CHANNEL_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(params.message_server_id)
    .bind(&params.name)
    .bind(params.channel_type.as_str())
    .bind(&params.source_type)
    .bind(&params.source_id)
    .bind(&params.topic)
    .bind(json_object(&params.metadata))
    .fetch_one(tx.conn())
    .await?;
    Ok(record)
}

async fn insert_participants(tx: &mut IsolatedTx, channel_id: Uuid, entity_ids: &[Uuid]) -> Result<()> {
    if entity_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO channel_participants (channel_id, entity_id)
        SELECT $1, e FROM unnest($2::uuid[]) AS e
        ON CONFLICT (channel_id, entity_id) DO NOTHING
        "#,
    )
    .bind(channel_id)
    .bind(entity_ids)
    .execute(tx.conn())
    .await?;
    Ok(())
}

/// Message servers, channels and messages
#[derive(Clone)]
pub struct PgMessagingStore {
    ctx: StoreContext,
}

impl PgMessagingStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl MessagingStore for PgMessagingStore {
    async fn create_message_server(&self, server: &MessageServer) -> Result<MessageServer> {
        self.ctx
            .retry("message_servers.create", move || async move {
                let mut tx = self.ctx.begin().await?;
                let record = sqlx::query_as::<_, MessageServerRecord>(&format!(
                    r#"
                    INSERT INTO message_servers (id, name, source_type, source_id, metadata)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (id) DO UPDATE SET updated_at = message_servers.updated_at
                    RETURNING {SERVER_COLUMNS}
                    "#
                ))
                .bind(server.id)
                .bind(&server.name)
                .bind(&server.source_type)
                .bind(&server.source_id)
                .bind(json_object(&server.metadata))
                .fetch_one(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(record.to_message_server())
            })
            .await
    }

    async fn get_message_servers(&self) -> Result<Vec<MessageServer>> {
        self.ctx
            .retry("message_servers.list", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, MessageServerRecord>(&format!(
                    "SELECT {SERVER_COLUMNS} FROM message_servers ORDER BY created_at"
                ))
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(MessageServerRecord::to_message_server).collect())
            })
            .await
    }

    async fn get_message_server_by_id(&self, id: Uuid) -> Result<Option<MessageServer>> {
        self.ctx
            .retry("message_servers.get", move || async move {
                let mut tx = self.ctx.begin().await?;
                let record = sqlx::query_as::<_, MessageServerRecord>(&format!(
                    "SELECT {SERVER_COLUMNS} FROM message_servers WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(record.map(|r| r.to_message_server()))
            })
            .await
    }

    async fn add_agent_to_message_server(&self, message_server_id: Uuid, agent_id: Uuid) -> Result<()> {
        self.ctx
            .retry("message_servers.add_agent", move || async move {
                let mut tx = self.ctx.begin().await?;
                sqlx::query(
                    r#"
                    INSERT INTO message_server_agents (message_server_id, agent_id)
                    VALUES ($1, $2)
                    ON CONFLICT (message_server_id, agent_id) DO NOTHING
                    "#,
                )
                .bind(message_server_id)
                .bind(agent_id)
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(())
            })
            .await
    }

    async fn get_agents_for_message_server(&self, message_server_id: Uuid) -> Result<Vec<Uuid>> {
        self.ctx
            .retry("message_servers.agents", move || async move {
                let mut tx = self.ctx.begin().await?;
                let ids: Vec<Uuid> = sqlx::query_scalar(
                    "SELECT agent_id FROM message_server_agents WHERE message_server_id = $1 ORDER BY created_at",
                )
                .bind(message_server_id)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(ids)
            })
            .await
    }

    async fn remove_agent_from_message_server(&self, message_server_id: Uuid, agent_id: Uuid) -> Result<bool> {
        self.ctx
            .retry("message_servers.remove_agent", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query(
                    "DELETE FROM message_server_agents WHERE message_server_id = $1 AND agent_id = $2",
                )
                .bind(message_server_id)
                .bind(agent_id)
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn create_channel(&self, params: &CreateChannelParams, participant_ids: &[Uuid]) -> Result<Channel> {
        let id = params.id.unwrap_or_else(Uuid::new_v4);
        self.ctx
            .retry("channels.create", move || async move {
                let mut tx = self.ctx.begin().await?;
                let record = insert_channel(&mut tx, id, params).await?;
                insert_participants(&mut tx, id, participant_ids).await?;
                tx.commit().await?;
                Ok(record.to_channel())
            })
            .await
    }

    async fn get_channels_for_message_server(&self, message_server_id: Uuid) -> Result<Vec<Channel>> {
        self.ctx
            .retry("channels.list", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, ChannelRecord>(&format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channels WHERE message_server_id = $1 ORDER BY created_at"
                ))
                .bind(message_server_id)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(ChannelRecord::to_channel).collect())
            })
            .await
    }

    async fn get_channel_details(&self, channel_id: Uuid) -> Result<Option<Channel>> {
        self.ctx
            .retry("channels.get", move || async move {
                let mut tx = self.ctx.begin().await?;
                let record = sqlx::query_as::<_, ChannelRecord>(&format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = $1"
                ))
                .bind(channel_id)
                .fetch_optional(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(record.map(|r| r.to_channel()))
            })
            .await
    }

    async fn update_channel(&self, channel_id: Uuid, update: &ChannelUpdate) -> Result<Channel> {
        self.ctx
            .retry("channels.update", move || async move {
                let mut tx = self.ctx.begin().await?;
                sqlx::query(
                    r#"
                    UPDATE channels SET
                        name = COALESCE($2, name),
                        topic = COALESCE($3, topic),
                        metadata = COALESCE($4, metadata),
                        updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(channel_id)
                .bind(&update.name)
                .bind(&update.topic)
                .bind(update.metadata.as_ref().map(json_object))
                .execute(tx.conn())
                .await?;

                if let Some(participant_ids) = &update.participant_ids {
                    sqlx::query("DELETE FROM channel_participants WHERE channel_id = $1")
                        .bind(channel_id)
                        .execute(tx.conn())
                        .await?;
                    insert_participants(&mut tx, channel_id, participant_ids).await?;
                }

                let record = sqlx::query_as::<_, ChannelRecord>(&format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = $1"
                ))
                .bind(channel_id)
                .fetch_optional(tx.conn())
                .await?;
                let Some(record) = record else {
                    tx.rollback().await?;
                    return Err(StoreError::not_found(format!("channel {channel_id}")));
                };

                tx.commit().await?;
                Ok(record.to_channel())
            })
            .await
    }

    async fn delete_channel(&self, channel_id: Uuid) -> Result<bool> {
        self.ctx
            .retry("channels.delete", move || async move {
                let mut tx = self.ctx.begin().await?;
                sqlx::query("DELETE FROM messages WHERE channel_id = $1")
                    .bind(channel_id)
                    .execute(tx.conn())
                    .await?;
                sqlx::query("DELETE FROM channel_participants WHERE channel_id = $1")
                    .bind(channel_id)
                    .execute(tx.conn())
                    .await?;
                let result = sqlx::query("DELETE FROM channels WHERE id = $1")
                    .bind(channel_id)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn add_channel_participants(&self, channel_id: Uuid, entity_ids: &[Uuid]) -> Result<()> {
        self.ctx
            .retry("channels.add_participants", move || async move {
                let mut tx = self.ctx.begin().await?;
                insert_participants(&mut tx, channel_id, entity_ids).await?;
                tx.commit().await?;
                Ok(())
            })
            .await
    }

    async fn get_channel_participants(&self, channel_id: Uuid) -> Result<Vec<Uuid>> {
        self.ctx
            .retry("channels.participants", move || async move {
                let mut tx = self.ctx.begin().await?;
                let ids: Vec<Uuid> = sqlx::query_scalar(
                    "SELECT entity_id FROM channel_participants WHERE channel_id = $1",
                )
                .bind(channel_id)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(ids)
            })
            .await
    }

    async fn find_or_create_dm_channel(&self, a: Uuid, b: Uuid, message_server_id: Uuid) -> Result<Channel> {
        let name = dm_channel_name(a, b);
        let params = CreateChannelParams {
            id: None,
            message_server_id,
            name: name.clone(),
            channel_type: ChannelType::Dm,
            source_type: None,
            source_id: None,
            topic: None,
            metadata: Default::default(),
        };
        let (name, params) = (name.as_str(), &params);

        self.ctx
            .retry("channels.find_or_create_dm", move || async move {
                let mut tx = self.ctx.begin().await?;

                // Serialize concurrent lookups for the same pair.
                sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                    .bind(format!("{message_server_id}:{name}"))
                    .execute(tx.conn())
                    .await?;

                let existing = sqlx::query_as::<_, ChannelRecord>(&format!(
                    r#"
                    SELECT {CHANNEL_COLUMNS} FROM channels
                    WHERE message_server_id = $1 AND name = $2 AND type = $3
                    ORDER BY created_at
                    LIMIT 1
                    "#
                ))
                .bind(message_server_id)
                .bind(name)
                .bind(ChannelType::Dm.as_str())
                .fetch_optional(tx.conn())
                .await?;

                let record = match existing {
                    Some(record) => record,
                    None => {
                        let id = Uuid::new_v4();
                        let record = insert_channel(&mut tx, id, params).await?;
                        insert_participants(&mut tx, id, &[a, b]).await?;
                        debug!(channel_id = %id, "Created DM channel");
                        record
                    }
                };

                tx.commit().await?;
                Ok(record.to_channel())
            })
            .await
    }

    async fn create_message(&self, params: &CreateMessageParams) -> Result<Message> {
        let id = params.id.unwrap_or_else(Uuid::new_v4);
        self.ctx
            .retry("messages.create", move || async move {
                let mut tx = self.ctx.begin().await?;
                let record = sqlx::query_as::<_, MessageRecord>(&format!(
                    r#"
                    INSERT INTO messages (id, channel_id, author_id, content, raw_message,
                                          in_reply_to_root_message_id, source_type, source_id, metadata)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    RETURNING {MESSAGE_COLUMNS}
                    "#
                ))
                .bind(id)
                .bind(params.channel_id)
                .bind(params.author_id)
                .bind(&params.content)
                .bind(&params.raw_message)
                .bind(params.in_reply_to_root_message_id)
                .bind(&params.source_type)
                .bind(&params.source_id)
                .bind(json_object(&params.metadata))
                .fetch_one(tx.conn())
                .await?;
                sqlx::query("UPDATE channels SET updated_at = now() WHERE id = $1")
                    .bind(params.channel_id)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(record.to_message())
            })
            .await
    }

    async fn get_messages_for_channel(&self, channel_id: Uuid, limit: i64, before: Option<i64>) -> Result<Vec<Message>> {
        self.ctx
            .retry("messages.list", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, MessageRecord>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE channel_id = $1
                      AND ($2::bigint IS NULL OR created_at < to_timestamp($2 / 1000.0))
                    ORDER BY created_at DESC
                    LIMIT $3
                    "#
                ))
                .bind(channel_id)
                .bind(before)
                .bind(limit)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(MessageRecord::to_message).collect())
            })
            .await
    }

    async fn delete_message(&self, message_id: Uuid) -> Result<bool> {
        self.ctx
            .retry("messages.delete", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query("DELETE FROM messages WHERE id = $1")
                    .bind(message_id)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }
}
