//! Row-level isolation tests.
//!
//! Superusers and roles with BYPASSRLS ignore row security, so these tests
//! need `ISOLATION_DATABASE_URL` pointing at a database owned by a plain role
//! with the `vector` extension already installed. They are skipped when the
//! variable is unset. Install and uninstall touch every table, so the tests
//! in this file run one at a time.

#![cfg(feature = "native")]

use std::sync::{Mutex, MutexGuard, PoisonError};

use elizaos_plugin_sql_isolation::base::*;
use elizaos_plugin_sql_isolation::error::{ErrorKind, StoreError};
use elizaos_plugin_sql_isolation::types::*;
use elizaos_plugin_sql_isolation::{
    EmbeddingDimension, PostgresAdapter, RetryPolicy, StoreConfig, Stores,
};
use uuid::Uuid;

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

fn isolation_url() -> Option<String> {
    match std::env::var("ISOLATION_DATABASE_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("Skipping test - ISOLATION_DATABASE_URL not set");
            None
        }
    }
}

async fn tenant(url: &str, server_id: Uuid) -> PostgresAdapter {
    tenant_with(StoreConfig::new(url).with_server_id(server_id)).await
}

async fn tenant_with(config: StoreConfig) -> PostgresAdapter {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let config = config.with_data_isolation(true);
    let adapter = PostgresAdapter::connect(config)
        .await
        .expect("Failed to create adapter");
    adapter.init().await.expect("Failed to init");
    adapter
}

struct Fixture {
    agent_id: Uuid,
    room_id: Uuid,
    members: [Uuid; 2],
    outsider: Uuid,
}

/// One agent, one room with two members, and an entity outside the room
async fn populate(stores: &Stores) -> Fixture {
    let agent_id = Uuid::new_v4();
    stores
        .agents()
        .create_agent(&Agent::new(agent_id, "IsolationAgent"))
        .await
        .unwrap();

    let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
    let entities: Vec<Entity> = ids
        .iter()
        .map(|&id| Entity {
            id,
            agent_id,
            names: vec![id.to_string()],
            ..Default::default()
        })
        .collect();
    assert!(stores.entities().create_entities(&entities).await.unwrap());

    let room_id = Uuid::new_v4();
    stores
        .rooms()
        .create_rooms(&[Room {
            id: room_id,
            agent_id: Some(agent_id),
            source: "test".to_string(),
            room_type: ChannelType::Group,
            ..Default::default()
        }])
        .await
        .unwrap();
    assert!(stores
        .rooms()
        .add_participants_room(&ids[..2], room_id)
        .await
        .unwrap());

    Fixture {
        agent_id,
        room_id,
        members: [ids[0], ids[1]],
        outsider: ids[2],
    }
}

#[tokio::test]
async fn test_shared_access_and_tenant_boundary() {
    let Some(url) = isolation_url() else { return };
    let _guard = serial();

    let x = tenant(&url, Uuid::new_v4()).await;
    let y = tenant(&url, Uuid::new_v4()).await;
    let fixture = populate(x.stores()).await;
    let [author, reader] = fixture.members;

    let memory = Memory::message(fixture.agent_id, author, fixture.room_id, "room note");
    let memory_id = x
        .for_entity(author)
        .memories()
        .create_memory(&memory, "messages")
        .await
        .unwrap();

    // A fellow participant reads it through the room
    let seen = x.for_entity(reader).memories().get_memory_by_id(memory_id).await.unwrap();
    assert_eq!(seen.map(|m| m.id), Some(Some(memory_id)));

    // Someone outside the room does not
    let hidden = x
        .for_entity(fixture.outsider)
        .memories()
        .get_memory_by_id(memory_id)
        .await
        .unwrap();
    assert!(hidden.is_none());

    // Strict table: no entity bound, no rows
    assert!(x.stores().memories().get_memory_by_id(memory_id).await.unwrap().is_none());

    // Another tenant sees nothing, whatever entity it binds
    assert!(y
        .for_entity(reader)
        .memories()
        .get_memory_by_id(memory_id)
        .await
        .unwrap()
        .is_none());
    assert!(y.stores().agents().get_agent(fixture.agent_id).await.unwrap().is_none());

    x.stores().agents().delete_agent(fixture.agent_id).await.unwrap();
}

#[tokio::test]
async fn test_permissive_tables_show_all_to_system() {
    let Some(url) = isolation_url() else { return };
    let _guard = serial();

    let x = tenant(&url, Uuid::new_v4()).await;
    let y = tenant(&url, Uuid::new_v4()).await;
    let fixture = populate(x.stores()).await;

    let rooms = x.stores().rooms();
    assert_eq!(rooms.get_rooms_by_ids(&[fixture.room_id]).await.unwrap().len(), 1);

    let member_view = x.for_entity(fixture.members[0]).rooms();
    assert_eq!(member_view.get_rooms_by_ids(&[fixture.room_id]).await.unwrap().len(), 1);

    let outsider_view = x.for_entity(fixture.outsider).rooms();
    assert!(outsider_view.get_rooms_by_ids(&[fixture.room_id]).await.unwrap().is_empty());

    assert!(y.stores().rooms().get_rooms_by_ids(&[fixture.room_id]).await.unwrap().is_empty());

    x.stores().agents().delete_agent(fixture.agent_id).await.unwrap();
}

#[tokio::test]
async fn test_nested_context_cannot_rebind() {
    let Some(url) = isolation_url() else { return };
    let _guard = serial();

    let x = tenant(&url, Uuid::new_v4()).await;
    let fixture = populate(x.stores()).await;
    let [first, second] = fixture.members;
    let other = x.for_entity(second);

    let result = x
        .context()
        .with_isolation_context(Some(first), move |tx| {
            Box::pin(async move {
                let bound: Option<String> =
                    sqlx::query_scalar("SELECT current_setting('app.entity_id', true)")
                        .fetch_one(&mut *tx.conn().await?)
                        .await?;
                assert_eq!(bound, Some(first.to_string()));

                other.rooms().get_rooms_by_ids(&[Uuid::new_v4()]).await
            })
        })
        .await;

    let err = result.expect_err("rebinding must fail");
    assert!(matches!(err.root(), StoreError::IsolationConflict { .. }));

    // The binding did not outlive its transaction
    let leaked: String = sqlx::query_scalar(
        "SELECT COALESCE(NULLIF(current_setting('app.entity_id', true), ''), 'unset')",
    )
    .fetch_one(x.context().pool())
    .await
    .unwrap();
    assert_eq!(leaked, "unset");

    x.stores().agents().delete_agent(fixture.agent_id).await.unwrap();
}

#[tokio::test]
async fn test_stores_join_context_on_single_connection() {
    let Some(url) = isolation_url() else { return };
    let _guard = serial();

    let config = StoreConfig::new(url.as_str())
        .with_server_id(Uuid::new_v4())
        .with_max_connections(1)
        .with_retry(RetryPolicy::immediate(1));
    let x = tenant_with(config).await;
    let fixture = populate(x.stores()).await;
    let [member, _] = fixture.members;
    let view = x.for_entity(member);

    let kept = Memory::message(fixture.agent_id, member, fixture.room_id, "kept");
    let kept_id = {
        let view = view.clone();
        x.context()
            .with_isolation_context(Some(member), move |tx| {
                Box::pin(async move {
                    let rooms = view.rooms().get_rooms_by_ids(&[fixture.room_id]).await?;
                    assert_eq!(rooms.len(), 1);

                    let id = view.memories().create_memory(&kept, "messages").await?;
                    let seen = view.memories().get_memory_by_id(id).await?;
                    assert_eq!(seen.and_then(|m| m.id), Some(id));

                    // The body's own statements share the transaction
                    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memories WHERE id = $1")
                        .bind(id)
                        .fetch_one(&mut *tx.conn().await?)
                        .await?;
                    assert_eq!(count, 1);
                    Ok::<_, StoreError>(id)
                })
            })
            .await
            .unwrap()
    };
    assert!(view.memories().get_memory_by_id(kept_id).await.unwrap().is_some());

    // An error from the body undoes every store call made inside it
    let discarded = Memory::message(fixture.agent_id, member, fixture.room_id, "discarded");
    let discarded_id = discarded.id.unwrap();
    let result: Result<(), StoreError> = {
        let view = view.clone();
        x.context()
            .with_isolation_context(Some(member), move |_tx| {
                Box::pin(async move {
                    view.memories().create_memory(&discarded, "messages").await?;
                    Err(StoreError::NotFound("abandoned".to_string()))
                })
            })
            .await
    };
    assert!(result.is_err());
    assert!(view.memories().get_memory_by_id(discarded_id).await.unwrap().is_none());

    // A failed store call does not poison the enclosing transaction
    let nested = {
        let view = view.clone();
        let context = x.context().clone();
        x.context()
            .with_isolation_context(Some(member), move |_tx| {
                Box::pin(async move {
                    let missing = Task {
                        id: Some(Uuid::new_v4()),
                        name: "orphan".to_string(),
                        agent_id: fixture.agent_id,
                        world_id: Some(Uuid::new_v4()),
                        entity_id: Some(member),
                        ..Default::default()
                    };
                    assert!(view.tasks().create_task(&missing).await.is_err());

                    context
                        .with_isolation_context(Some(member), move |_inner| {
                            Box::pin(async move { view.rooms().get_rooms_by_ids(&[fixture.room_id]).await })
                        })
                        .await
                })
            })
            .await
            .unwrap()
    };
    assert_eq!(nested.len(), 1);

    x.stores().agents().delete_agent(fixture.agent_id).await.unwrap();
}

#[tokio::test]
async fn test_remove_world_deletes_hidden_memories() {
    let Some(url) = isolation_url() else { return };
    let _guard = serial();

    let x = tenant(&url, Uuid::new_v4()).await;
    let fixture = populate(x.stores()).await;
    let [member, _] = fixture.members;

    let world_id = x
        .stores()
        .rooms()
        .create_world(&World {
            id: Uuid::new_v4(),
            agent_id: fixture.agent_id,
            name: Some("Guild".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let world_room = Uuid::new_v4();
    x.stores()
        .rooms()
        .create_rooms(&[Room {
            id: world_room,
            agent_id: Some(fixture.agent_id),
            world_id: Some(world_id),
            source: "test".to_string(),
            room_type: ChannelType::Group,
            ..Default::default()
        }])
        .await
        .unwrap();
    assert!(x
        .stores()
        .rooms()
        .add_participants_room(&[member], world_room)
        .await
        .unwrap());

    let view = x.for_entity(member);
    let mut in_room = Memory::message(fixture.agent_id, member, world_room, "in the world's room");
    in_room.world_id = Some(world_id);
    // Scoped to the world but stored in a room outside it
    let mut world_only = Memory::message(fixture.agent_id, member, fixture.room_id, "world scoped");
    world_only.world_id = Some(world_id);
    let in_room_id = view.memories().create_memory(&in_room, "messages").await.unwrap();
    let world_only_id = view.memories().create_memory(&world_only, "messages").await.unwrap();

    // The system context sees no strict rows but still removes them
    x.stores().rooms().remove_world(world_id).await.unwrap();

    assert!(view.memories().get_memory_by_id(in_room_id).await.unwrap().is_none());
    assert!(view.memories().get_memory_by_id(world_only_id).await.unwrap().is_none());
    assert_eq!(view.rooms().get_rooms_by_ids(&[fixture.room_id]).await.unwrap().len(), 1);

    x.stores().agents().delete_agent(fixture.agent_id).await.unwrap();
}

#[tokio::test]
async fn test_embedding_width_visible_without_entity() {
    let Some(url) = isolation_url() else { return };
    let _guard = serial();

    let server_id = Uuid::new_v4();
    let x = tenant(&url, server_id).await;
    let fixture = populate(x.stores()).await;
    let [member, _] = fixture.members;

    x.stores()
        .memories()
        .ensure_embedding_dimension(fixture.agent_id, EmbeddingDimension::Dim768)
        .await
        .unwrap();
    let mut wide = Memory::message(fixture.agent_id, member, fixture.room_id, "wide");
    wide.embedding = Some(vec![0.5; 768]);
    x.for_entity(member)
        .memories()
        .create_memory(&wide, "messages")
        .await
        .unwrap();

    // The memory is hidden from the system context; its vector is not
    let err = x
        .stores()
        .memories()
        .ensure_embedding_dimension(fixture.agent_id, EmbeddingDimension::Dim384)
        .await
        .expect_err("768-wide vectors exist");
    assert_eq!(err.kind(), ErrorKind::Integrity);

    // A new process for the same tenant reads the recorded width
    let restarted = tenant(&url, server_id).await;
    assert_eq!(
        restarted
            .stores()
            .memories()
            .get_embedding_dimension(fixture.agent_id)
            .await
            .unwrap(),
        EmbeddingDimension::Dim768
    );
    let mut narrow = Memory::message(fixture.agent_id, member, fixture.room_id, "narrow");
    narrow.embedding = Some(vec![0.5; 384]);
    let err = restarted
        .for_entity(member)
        .memories()
        .create_memory(&narrow, "messages")
        .await
        .expect_err("agent stores 768-wide vectors");
    assert!(matches!(err.root(), StoreError::InvalidDimension(384)));

    x.stores().agents().delete_agent(fixture.agent_id).await.unwrap();
}

#[tokio::test]
async fn test_isolation_status_reports_policies() {
    let Some(url) = isolation_url() else { return };
    let _guard = serial();

    let x = tenant(&url, Uuid::new_v4()).await;
    let status = x.isolation_status().await.unwrap();
    let table = |name: &str| {
        status
            .iter()
            .find(|s| s.table == format!("public.{name}"))
            .cloned()
            .unwrap_or_else(|| panic!("{name} missing from status"))
    };

    let memories = table("memories");
    assert!(memories.rls_enabled && memories.rls_forced);
    assert!(memories.tenant_policy && memories.entity_policy);

    let entities = table("entities");
    assert!(entities.tenant_policy);
    assert!(!entities.entity_policy);

    let servers = table("servers");
    assert!(!servers.tenant_policy);
}

#[tokio::test]
async fn test_reenable_backfills_only_null_tenants() {
    let Some(url) = isolation_url() else { return };
    let _guard = serial();

    let x_id = Uuid::new_v4();
    let y_id = Uuid::new_v4();
    let x = tenant(&url, x_id).await;
    let fixture = populate(x.stores()).await;

    x.uninstall_isolation().await.unwrap();

    // While isolation is off, new rows carry no tenant
    let plain = PostgresAdapter::connect(StoreConfig::new(url.as_str()))
        .await
        .unwrap();
    let late_room = Uuid::new_v4();
    plain
        .stores()
        .rooms()
        .create_rooms(&[Room {
            id: late_room,
            agent_id: Some(fixture.agent_id),
            source: "test".to_string(),
            room_type: ChannelType::Group,
            ..Default::default()
        }])
        .await
        .unwrap();
    let tenant_of = |room: Uuid| {
        let pool = plain.context().pool().clone();
        async move {
            sqlx::query_scalar::<_, Option<Uuid>>("SELECT server_id FROM rooms WHERE id = $1")
                .bind(room)
                .fetch_one(&pool)
                .await
                .unwrap()
        }
    };
    assert_eq!(tenant_of(late_room).await, None);
    assert_eq!(tenant_of(fixture.room_id).await, Some(x_id));

    // Tenant Y re-enables isolation
    let y = tenant(&url, y_id).await;
    let y_rooms = y.stores().rooms().get_rooms_by_ids(&[fixture.room_id, late_room]).await.unwrap();
    assert_eq!(y_rooms.iter().map(|r| r.id).collect::<Vec<_>>(), vec![late_room]);

    let x_rooms = x.stores().rooms().get_rooms_by_ids(&[fixture.room_id, late_room]).await.unwrap();
    assert_eq!(x_rooms.iter().map(|r| r.id).collect::<Vec<_>>(), vec![fixture.room_id]);

    x.stores().agents().delete_agent(fixture.agent_id).await.unwrap();
}
