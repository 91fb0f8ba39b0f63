//! Isolation context and the shared store context.
//!
//! Every store operation runs in a transaction. When isolation is enabled the
//! tenant and entity ids are bound with `set_config(.., true)`, which scopes
//! them to that transaction; they vanish on commit or rollback and never leak
//! to the next user of the pooled connection.
//!
//! Inside [`StoreContext::with_isolation_context`] the stores of the same
//! context join the context's transaction instead of opening their own. Each
//! joined operation runs under a savepoint, so a failed operation is undone
//! without aborting the caller's transaction.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Postgres, Transaction};
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::isolation::policy::BIND_CONTEXT_SQL;
use crate::retry::{with_retry, RetryPolicy};
use crate::schema::EmbeddingDimension;

const SAVEPOINT_SQL: &str = "SAVEPOINT store_op";
const RELEASE_SAVEPOINT_SQL: &str = "RELEASE SAVEPOINT store_op";
const ROLLBACK_SAVEPOINT_SQL: &str = "ROLLBACK TO SAVEPOINT store_op; RELEASE SAVEPOINT store_op";

/// Run a savepoint statement. Boxed so callers' futures stay provably `Send`.
fn exec_savepoint_sql<'c>(conn: &'c mut PgConnection, sql: &'static str) -> BoxFuture<'c, Result<()>> {
    let run = sqlx::Executor::execute(conn, sqlx::raw_sql(sql));
    Box::pin(async move {
        run.await?;
        Ok(())
    })
}

tokio::task_local! {
    static BOUND_ENTITY: Option<Uuid>;
    static ACTIVE_TX: ActiveTx;
}

/// Entity bound by the enclosing [`StoreContext::with_isolation_context`]
/// call on this task, if any.
pub fn bound_entity() -> Option<Option<Uuid>> {
    BOUND_ENTITY.try_with(|entity| *entity).ok()
}

fn check_rebind(requested: Option<Uuid>) -> Result<()> {
    match bound_entity() {
        Some(bound) if bound != requested => Err(StoreError::IsolationConflict { bound, requested }),
        _ => Ok(()),
    }
}

/// Transaction opened by an isolation context, shared with joined operations
struct SharedTx {
    tx: Transaction<'static, Postgres>,
    savepoint_open: bool,
}

impl SharedTx {
    /// Undo a joined operation that ended without commit or rollback
    async fn settle(&mut self) -> Result<()> {
        if self.savepoint_open {
            self.savepoint_open = false;
            exec_savepoint_sql(&mut self.tx, ROLLBACK_SAVEPOINT_SQL).await?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct ActiveTx {
    owner: Arc<ContextInner>,
    shared: Arc<Mutex<SharedTx>>,
}

enum TxHandle {
    Owned(Transaction<'static, Postgres>),
    Joined(OwnedMutexGuard<SharedTx>),
}

/// Transaction with the isolation identity bound.
///
/// Either a transaction of its own or a savepoint in the enclosing isolation
/// context's transaction. Dropping it without commit undoes its statements.
pub struct IsolatedTx {
    handle: TxHandle,
    entity_id: Option<Uuid>,
}

impl IsolatedTx {
    /// Connection to issue statements on
    pub fn conn(&mut self) -> &mut PgConnection {
        match &mut self.handle {
            TxHandle::Owned(tx) => &mut **tx,
            TxHandle::Joined(shared) => &mut *shared.tx,
        }
    }

    /// Entity bound to this transaction
    pub fn entity_id(&self) -> Option<Uuid> {
        self.entity_id
    }

    /// Whether this runs inside an enclosing isolation context
    pub fn is_joined(&self) -> bool {
        matches!(self.handle, TxHandle::Joined(_))
    }

    /// Commit, or release the savepoint when joined
    pub async fn commit(self) -> Result<()> {
        self.commit_boxed().await
    }

    fn commit_boxed(self) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            match self.handle {
                TxHandle::Owned(tx) => tx.commit().await?,
                TxHandle::Joined(mut shared) => {
                    exec_savepoint_sql(&mut shared.tx, RELEASE_SAVEPOINT_SQL).await?;
                    shared.savepoint_open = false;
                }
            }
            Ok(())
        })
    }

    /// Roll back, or return to the savepoint when joined
    pub async fn rollback(self) -> Result<()> {
        self.rollback_boxed().await
    }

    fn rollback_boxed(self) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            match self.handle {
                TxHandle::Owned(tx) => tx.rollback().await?,
                TxHandle::Joined(mut shared) => shared.settle().await?,
            }
            Ok(())
        })
    }
}

/// Transaction of an isolation context, handed to its body
pub struct ContextTx {
    shared: Arc<Mutex<SharedTx>>,
    entity_id: Option<Uuid>,
}

impl ContextTx {
    /// Entity bound to the context
    pub fn entity_id(&self) -> Option<Uuid> {
        self.entity_id
    }

    /// Lock the connection for statements of the body's own. Stores called
    /// in the same context wait for the guard, so drop it before calling one.
    pub async fn conn(&self) -> Result<ContextConn<'_>> {
        let mut guard = self.shared.lock().await;
        guard.settle().await?;
        Ok(ContextConn { guard })
    }
}

/// Locked connection of a [`ContextTx`]
pub struct ContextConn<'a> {
    guard: MutexGuard<'a, SharedTx>,
}

impl Deref for ContextConn<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        &self.guard.tx
    }
}

impl DerefMut for ContextConn<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        &mut self.guard.tx
    }
}

struct ContextInner {
    pool: PgPool,
    server_id: Uuid,
    isolation_enabled: bool,
    retry: RetryPolicy,
    default_dimension: EmbeddingDimension,
}

/// Shared by every store: pool access, retry, isolation and embedding width.
///
/// Cloning is cheap. A clone may be scoped to an entity with
/// [`StoreContext::for_entity`].
#[derive(Clone)]
pub struct StoreContext {
    inner: Arc<ContextInner>,
    entity_id: Option<Uuid>,
}

impl StoreContext {
    /// Unscoped (system) context
    pub fn new(pool: PgPool, config: &StoreConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                pool,
                server_id: config.server_id,
                isolation_enabled: config.data_isolation,
                retry: config.retry.clone(),
                default_dimension: config.embedding_dimension,
            }),
            entity_id: None,
        }
    }

    /// Same context, bound to `entity_id`
    pub fn for_entity(&self, entity_id: Uuid) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            entity_id: Some(entity_id),
        }
    }

    /// Same context with no entity (privileged)
    pub fn system(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            entity_id: None,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    pub fn server_id(&self) -> Uuid {
        self.inner.server_id
    }

    pub fn entity_id(&self) -> Option<Uuid> {
        self.entity_id
    }

    pub fn isolation_enabled(&self) -> bool {
        self.inner.isolation_enabled
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// Width used for agents that have not recorded one
    pub fn default_dimension(&self) -> EmbeddingDimension {
        self.inner.default_dimension
    }

    /// Open a transaction bound to this context's entity
    pub async fn begin(&self) -> Result<IsolatedTx> {
        self.begin_as(self.entity_id).await
    }

    /// Open a transaction bound to `entity_id`. Inside an isolation context of
    /// this store context, joins its transaction under a savepoint instead.
    pub async fn begin_as(&self, entity_id: Option<Uuid>) -> Result<IsolatedTx> {
        self.begin_as_boxed(entity_id).await
    }

    fn begin_as_boxed(&self, entity_id: Option<Uuid>) -> BoxFuture<'_, Result<IsolatedTx>> {
        Box::pin(async move {
            check_rebind(entity_id)?;

            if let Some(shared) = self.active_tx() {
                let mut shared = shared.lock_owned().await;
                shared.settle().await?;
                exec_savepoint_sql(&mut shared.tx, SAVEPOINT_SQL).await?;
                shared.savepoint_open = true;
                return Ok(IsolatedTx {
                    handle: TxHandle::Joined(shared),
                    entity_id,
                });
            }

            let tx = self.open(entity_id).await?;
            Ok(IsolatedTx {
                handle: TxHandle::Owned(tx),
                entity_id,
            })
        })
    }

    async fn open(&self, entity_id: Option<Uuid>) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.inner.pool.begin().await?;
        if self.inner.isolation_enabled {
            sqlx::query(BIND_CONTEXT_SQL)
                .bind(self.inner.server_id.to_string())
                .bind(entity_id.map(|e| e.to_string()).unwrap_or_default())
                .execute(&mut *tx)
                .await?;
        }
        Ok(tx)
    }

    /// Transaction of the enclosing isolation context, when it belongs to
    /// this store context
    fn active_tx(&self) -> Option<Arc<Mutex<SharedTx>>> {
        ACTIVE_TX
            .try_with(|active| Arc::ptr_eq(&active.owner, &self.inner).then(|| Arc::clone(&active.shared)))
            .ok()
            .flatten()
    }

    /// Run `body` in one transaction bound to `entity_id` (`None` for a
    /// privileged caller). Commits on success, rolls back on error.
    ///
    /// Stores of this context called from `body` run in the same
    /// transaction. A nested call reuses the enclosing transaction and leaves
    /// the commit to the outermost one. Nested calls on the same task must
    /// use the same entity; anything else fails with
    /// [`StoreError::IsolationConflict`].
    pub async fn with_isolation_context<T, F>(&self, entity_id: Option<Uuid>, body: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t ContextTx) -> BoxFuture<'t, Result<T>> + Send,
        T: Send,
    {
        check_rebind(entity_id)?;

        if let Some(shared) = self.active_tx() {
            let scoped = ContextTx { shared, entity_id };
            return body(&scoped).await;
        }

        let tx = self.open(entity_id).await?;
        let shared = Arc::new(Mutex::new(SharedTx {
            tx,
            savepoint_open: false,
        }));
        let active = ActiveTx {
            owner: Arc::clone(&self.inner),
            shared: Arc::clone(&shared),
        };
        let scoped = ContextTx {
            shared: Arc::clone(&shared),
            entity_id,
        };

        let outcome = BOUND_ENTITY
            .scope(entity_id, ACTIVE_TX.scope(active, body(&scoped)))
            .await;
        drop(scoped);

        let Ok(shared) = Arc::try_unwrap(shared) else {
            // A joined transaction outlived the body; it rolls back when dropped
            return Err(StoreError::Config(
                "isolation context transaction still in use after its body returned".to_string(),
            ));
        };
        let mut shared = shared.into_inner();

        match outcome {
            Ok(value) => {
                shared.settle().await?;
                shared.tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = shared.tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed after isolation context error");
                }
                Err(e)
            }
        }
    }

    /// Run `operation` under the shared retry policy. The final error keeps
    /// its kind and gains the operation name and attempt count.
    pub async fn retry<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match with_retry(&self.inner.retry, operation, f).await {
            Ok(value) => Ok(value),
            Err(failure) => {
                debug!(operation, attempts = failure.attempts, "Operation failed");
                Err(failure.annotate(operation))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_task_accepts_any_entity() {
        assert_eq!(bound_entity(), None);
        assert!(check_rebind(Some(Uuid::new_v4())).is_ok());
        assert!(check_rebind(None).is_ok());
    }

    #[tokio::test]
    async fn test_nested_rebind_fails_fast() {
        let bound = Uuid::new_v4();
        let other = Uuid::new_v4();

        BOUND_ENTITY
            .scope(Some(bound), async move {
                assert_eq!(bound_entity(), Some(Some(bound)));
                assert!(check_rebind(Some(bound)).is_ok());
                assert!(matches!(
                    check_rebind(Some(other)),
                    Err(StoreError::IsolationConflict { .. })
                ));
                assert!(check_rebind(None).is_err());
            })
            .await;
    }

    #[tokio::test]
    async fn test_system_scope_rejects_entity() {
        BOUND_ENTITY
            .scope(None, async {
                assert!(check_rebind(None).is_ok());
                assert!(check_rebind(Some(Uuid::new_v4())).is_err());
            })
            .await;
    }
}
