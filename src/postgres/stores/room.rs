use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use super::json_object;
use crate::base::RoomStore;
use crate::error::Result;
use crate::postgres::context::StoreContext;
use crate::schema::{ParticipantRecord, RoomRecord, WorldRecord};
use crate::types::{Participant, ParticipantState, Room, World};

const ROOM_COLUMNS: &str =
    "id, agent_id, source, type, message_server_id, world_id, name, metadata, channel_id";

/// Worlds, rooms and room participants
#[derive(Clone)]
pub struct PgRoomStore {
    ctx: StoreContext,
}

impl PgRoomStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RoomStore for PgRoomStore {
    async fn create_world(&self, world: &World) -> Result<Uuid> {
        self.ctx
            .retry("worlds.create", move || async move {
                let mut tx = self.ctx.begin().await?;
                sqlx::query(
                    r#"
                    INSERT INTO worlds (id, agent_id, name, message_server_id, metadata)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(world.id)
                .bind(world.agent_id)
                .bind(&world.name)
                .bind(world.message_server_id)
                .bind(json_object(&world.metadata))
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(world.id)
            })
            .await
    }

    async fn get_world(&self, id: Uuid) -> Result<Option<World>> {
        self.ctx
            .retry("worlds.get", move || async move {
                let mut tx = self.ctx.begin().await?;
                let record = sqlx::query_as::<_, WorldRecord>(
                    "SELECT id, agent_id, name, message_server_id, metadata, created_at FROM worlds WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(record.map(|r| r.to_world()))
            })
            .await
    }

    async fn get_all_worlds(&self) -> Result<Vec<World>> {
        self.ctx
            .retry("worlds.list", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, WorldRecord>(
                    "SELECT id, agent_id, name, message_server_id, metadata, created_at FROM worlds ORDER BY created_at",
                )
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(WorldRecord::to_world).collect())
            })
            .await
    }

    async fn update_world(&self, world: &World) -> Result<bool> {
        self.ctx
            .retry("worlds.update", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query(
                    "UPDATE worlds SET name = $2, message_server_id = $3, metadata = $4 WHERE id = $1",
                )
                .bind(world.id)
                .bind(&world.name)
                .bind(world.message_server_id)
                .bind(json_object(&world.metadata))
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn remove_world(&self, id: Uuid) -> Result<()> {
        let rooms = self
            .ctx
            .retry("worlds.remove", move || async move {
                let mut tx = self.ctx.begin().await?;

                let room_ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM rooms WHERE world_id = $1")
                    .bind(id)
                    .fetch_all(tx.conn())
                    .await?;

                // Strict tables may hide rows from this context. Those go with
                // the foreign key cascades from rooms and worlds below.
                if !room_ids.is_empty() {
                    sqlx::query("DELETE FROM logs WHERE room_id = ANY($1)")
                        .bind(&room_ids)
                        .execute(tx.conn())
                        .await?;
                    sqlx::query("DELETE FROM participants WHERE room_id = ANY($1)")
                        .bind(&room_ids)
                        .execute(tx.conn())
                        .await?;
                }

                sqlx::query(
                    r#"
                    DELETE FROM embeddings
                    WHERE memory_id IN (
                        SELECT id FROM memories WHERE room_id = ANY($1) OR world_id = $2
                    )
                    "#,
                )
                .bind(&room_ids)
                .bind(id)
                .execute(tx.conn())
                .await?;
                sqlx::query("DELETE FROM memories WHERE room_id = ANY($1) OR world_id = $2")
                    .bind(&room_ids)
                    .bind(id)
                    .execute(tx.conn())
                    .await?;

                sqlx::query("DELETE FROM rooms WHERE world_id = $1")
                    .bind(id)
                    .execute(tx.conn())
                    .await?;
                sqlx::query("DELETE FROM worlds WHERE id = $1")
                    .bind(id)
                    .execute(tx.conn())
                    .await?;

                tx.commit().await?;
                Ok(room_ids.len())
            })
            .await?;

        info!(world_id = %id, rooms, "Removed world");
        Ok(())
    }

    async fn create_rooms(&self, rooms: &[Room]) -> Result<Vec<Uuid>> {
        if rooms.is_empty() {
            return Ok(Vec::new());
        }
        self.ctx
            .retry("rooms.create", move || async move {
                let mut tx = self.ctx.begin().await?;
                let mut ids = Vec::with_capacity(rooms.len());
                for room in rooms {
                    let inserted: Option<Uuid> = sqlx::query_scalar(
                        r#"
                        INSERT INTO rooms (id, agent_id, source, type, message_server_id, world_id, name, metadata, channel_id)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                        ON CONFLICT (id) DO NOTHING
                        RETURNING id
                        "#,
                    )
                    .bind(room.id)
                    .bind(room.agent_id)
                    .bind(&room.source)
                    .bind(room.room_type.as_str())
                    .bind(room.message_server_id)
                    .bind(room.world_id)
                    .bind(&room.name)
                    .bind(json_object(&room.metadata))
                    .bind(&room.channel_id)
                    .fetch_optional(tx.conn())
                    .await?;
                    ids.extend(inserted);
                }
                tx.commit().await?;
                Ok(ids)
            })
            .await
    }

    async fn get_rooms_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Room>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.ctx
            .retry("rooms.get_by_ids", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, RoomRecord>(&format!(
                    "SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ANY($1) ORDER BY created_at"
                ))
                .bind(ids)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(RoomRecord::to_room).collect())
            })
            .await
    }

    async fn get_rooms_by_world(&self, world_id: Uuid) -> Result<Vec<Room>> {
        self.ctx
            .retry("rooms.get_by_world", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, RoomRecord>(&format!(
                    "SELECT {ROOM_COLUMNS} FROM rooms WHERE world_id = $1 ORDER BY created_at"
                ))
                .bind(world_id)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(RoomRecord::to_room).collect())
            })
            .await
    }

    async fn update_room(&self, room: &Room) -> Result<bool> {
        self.ctx
            .retry("rooms.update", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query(
                    r#"
                    UPDATE rooms
                    SET name = $2, source = $3, type = $4, message_server_id = $5,
                        world_id = $6, metadata = $7, channel_id = $8
                    WHERE id = $1
                    "#,
                )
                .bind(room.id)
                .bind(&room.name)
                .bind(&room.source)
                .bind(room.room_type.as_str())
                .bind(room.message_server_id)
                .bind(room.world_id)
                .bind(json_object(&room.metadata))
                .bind(&room.channel_id)
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn delete_room(&self, room_id: Uuid) -> Result<bool> {
        self.ctx
            .retry("rooms.delete", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query("DELETE FROM rooms WHERE id = $1")
                    .bind(room_id)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn delete_rooms_by_world_id(&self, world_id: Uuid) -> Result<()> {
        let deleted = self
            .ctx
            .retry("rooms.delete_by_world", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query("DELETE FROM rooms WHERE world_id = $1")
                    .bind(world_id)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected())
            })
            .await?;
        debug!(world_id = %world_id, deleted, "Deleted rooms for world");
        Ok(())
    }

    async fn add_participants_room(&self, entity_ids: &[Uuid], room_id: Uuid) -> Result<bool> {
        if entity_ids.is_empty() {
            return Ok(true);
        }
        self.ctx
            .retry("participants.add", move || async move {
                let mut tx = self.ctx.begin().await?;
                sqlx::query(
                    r#"
                    INSERT INTO participants (entity_id, room_id, agent_id)
                    SELECT e, $2, (SELECT agent_id FROM rooms WHERE id = $2)
                    FROM unnest($1::uuid[]) AS e
                    ON CONFLICT (entity_id, room_id) DO NOTHING
                    "#,
                )
                .bind(entity_ids)
                .bind(room_id)
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(true)
            })
            .await
    }

    async fn remove_participant(&self, entity_id: Uuid, room_id: Uuid) -> Result<bool> {
        self.ctx
            .retry("participants.remove", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query("DELETE FROM participants WHERE entity_id = $1 AND room_id = $2")
                    .bind(entity_id)
                    .bind(room_id)
                    .execute(tx.conn())
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn get_participants_for_entity(&self, entity_id: Uuid) -> Result<Vec<Participant>> {
        self.ctx
            .retry("participants.for_entity", move || async move {
                let mut tx = self.ctx.begin().await?;
                let records = sqlx::query_as::<_, ParticipantRecord>(
                    r#"
                    SELECT id, entity_id, room_id, room_state, created_at
                    FROM participants WHERE entity_id = $1
                    ORDER BY created_at
                    "#,
                )
                .bind(entity_id)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(records.iter().map(ParticipantRecord::to_participant).collect())
            })
            .await
    }

    async fn get_participants_for_room(&self, room_id: Uuid) -> Result<Vec<Uuid>> {
        self.ctx
            .retry("participants.for_room", move || async move {
                let mut tx = self.ctx.begin().await?;
                let ids: Vec<Uuid> = sqlx::query_scalar(
                    "SELECT entity_id FROM participants WHERE room_id = $1 ORDER BY created_at",
                )
                .bind(room_id)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(ids)
            })
            .await
    }

    async fn is_room_participant(&self, room_id: Uuid, entity_id: Uuid) -> Result<bool> {
        self.ctx
            .retry("participants.is_member", move || async move {
                let mut tx = self.ctx.begin().await?;
                let exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM participants WHERE room_id = $1 AND entity_id = $2)",
                )
                .bind(room_id)
                .bind(entity_id)
                .fetch_one(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(exists)
            })
            .await
    }

    async fn get_rooms_for_participant(&self, entity_id: Uuid) -> Result<Vec<Uuid>> {
        self.get_rooms_for_participants(&[entity_id]).await
    }

    async fn get_rooms_for_participants(&self, entity_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.ctx
            .retry("participants.rooms", move || async move {
                let mut tx = self.ctx.begin().await?;
                let ids: Vec<Uuid> = sqlx::query_scalar(
                    "SELECT DISTINCT room_id FROM participants WHERE entity_id = ANY($1)",
                )
                .bind(entity_ids)
                .fetch_all(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(ids)
            })
            .await
    }

    async fn get_participant_user_state(&self, room_id: Uuid, entity_id: Uuid) -> Result<Option<ParticipantState>> {
        self.ctx
            .retry("participants.get_state", move || async move {
                let mut tx = self.ctx.begin().await?;
                let state: Option<Option<String>> = sqlx::query_scalar(
                    "SELECT room_state FROM participants WHERE room_id = $1 AND entity_id = $2",
                )
                .bind(room_id)
                .bind(entity_id)
                .fetch_optional(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(state.flatten().as_deref().and_then(ParticipantState::parse))
            })
            .await
    }

    async fn set_participant_user_state(
        &self,
        room_id: Uuid,
        entity_id: Uuid,
        state: Option<ParticipantState>,
    ) -> Result<bool> {
        self.ctx
            .retry("participants.set_state", move || async move {
                let mut tx = self.ctx.begin().await?;
                let result = sqlx::query(
                    "UPDATE participants SET room_state = $3 WHERE room_id = $1 AND entity_id = $2",
                )
                .bind(room_id)
                .bind(entity_id)
                .bind(state.map(|s| s.as_str()))
                .execute(tx.conn())
                .await?;
                tx.commit().await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }
}
