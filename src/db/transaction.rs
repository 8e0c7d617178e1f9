//! Transaction coordination shared by both query backends.
//!
//! A transaction owns the connection it was opened on until it is committed
//! or rolled back. The `TransactionContext` handle is cheap to clone and is
//! what callers pass to `DslContext::with_transaction` and
//! `SqlSessionFactory::open_session_in`; statements issued through it are
//! serialized on that one connection.

use crate::db::executor;
use crate::db::pool::{DataSource, DbConnection, PooledConnection};
use crate::error::{DataError, DataResult};
use crate::models::DatabaseType;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Upper bound for BEGIN, COMMIT and ROLLBACK.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// An open transaction on a connection borrowed from the pool.
///
/// The connection is returned to the pool only after a successful COMMIT or
/// ROLLBACK. On any other path (a failed COMMIT, a timed-out statement, the
/// value being dropped while open) it is detached from the pool and closed,
/// and the server rolls the transaction back.
pub struct DbTransaction {
    db_type: DatabaseType,
    conn: Option<PooledConnection>,
}

impl DbTransaction {
    /// Issue BEGIN on `conn`.
    pub(crate) async fn begin(mut conn: PooledConnection) -> DataResult<Self> {
        let db_type = conn.db_type();
        if let Err(e) = executor::execute(conn.as_connection(), "BEGIN", &[], CONTROL_TIMEOUT).await {
            conn.discard();
            return Err(e);
        }
        Ok(Self {
            db_type,
            conn: Some(conn),
        })
    }

    /// Get the database type for this transaction.
    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// The connection this transaction runs on.
    pub fn as_connection(&mut self) -> Option<DbConnection<'_>> {
        self.conn.as_mut().map(PooledConnection::as_connection)
    }

    pub async fn commit(mut self) -> DataResult<()> {
        self.finish("COMMIT").await
    }

    pub async fn rollback(mut self) -> DataResult<()> {
        self.finish("ROLLBACK").await
    }

    /// Close the connection without ending the transaction.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            conn.discard();
        }
    }

    async fn finish(&mut self, sql: &str) -> DataResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Err(DataError::internal("transaction has no connection"));
        };
        match executor::execute(conn.as_connection(), sql, &[], CONTROL_TIMEOUT).await {
            Ok(_) => Ok(()),
            Err(e) => {
                conn.discard();
                Err(e)
            }
        }
    }
}

impl Drop for DbTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.discard();
        }
    }
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbTransaction")
            .field("db_type", &self.db_type)
            .field("open", &self.conn.is_some())
            .finish()
    }
}

/// Exclusive use of a live transaction's connection, held for one statement.
pub struct TransactionGuard {
    ctx: TransactionContext,
    slot: OwnedMutexGuard<Option<DbTransaction>>,
}

impl TransactionGuard {
    pub fn as_connection(&mut self) -> DataResult<DbConnection<'_>> {
        self.slot
            .as_mut()
            .and_then(DbTransaction::as_connection)
            .ok_or_else(|| self.ctx.closed_error())
    }

    /// End the transaction after a statement on it timed out. The
    /// connection may still be busy, so it is closed rather than rolled
    /// back; later statements and commit/rollback fail.
    pub(crate) fn abort(&mut self) {
        self.ctx.inner.aborted.store(true, Ordering::SeqCst);
        if let Some(tx) = self.slot.take() {
            warn!(
                transaction_id = %self.ctx.id(),
                "Statement timed out inside transaction; closing its connection"
            );
            tx.discard();
        }
    }
}

impl std::fmt::Debug for TransactionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionGuard")
            .field("transaction_id", &self.ctx.id())
            .finish()
    }
}

struct TransactionInner {
    id: String,
    data_source: String,
    started_at: DateTime<Utc>,
    created: Instant,
    /// `None` once committed or rolled back.
    slot: Arc<Mutex<Option<DbTransaction>>>,
    /// Set when a statement timeout ended the transaction.
    aborted: AtomicBool,
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        let still_active = self
            .slot
            .try_lock()
            .map(|slot| slot.is_some())
            .unwrap_or(true);
        if still_active {
            // the connection is closed with the transaction open
            warn!(
                transaction_id = %self.id,
                pool_name = %self.data_source,
                "Transaction dropped while active; rolling back"
            );
        }
    }
}

/// Handle on one open transaction.
#[derive(Clone)]
pub struct TransactionContext {
    inner: Arc<TransactionInner>,
}

impl TransactionContext {
    fn new(data_source: &str, tx: DbTransaction) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id: generate_transaction_id(),
                data_source: data_source.to_string(),
                started_at: Utc::now(),
                created: Instant::now(),
                slot: Arc::new(Mutex::new(Some(tx))),
                aborted: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn data_source_name(&self) -> &str {
        &self.inner.data_source
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Whether the transaction is still open. A statement currently running
    /// on it counts as open.
    pub fn is_active(&self) -> bool {
        self.inner
            .slot
            .try_lock()
            .map(|slot| slot.is_some())
            .unwrap_or(true)
    }

    /// Wait for exclusive use of the transaction's connection.
    pub(crate) async fn lock(&self) -> DataResult<TransactionGuard> {
        let slot = Arc::clone(&self.inner.slot).lock_owned().await;
        if slot.is_none() {
            return Err(self.closed_error());
        }
        Ok(TransactionGuard {
            ctx: self.clone(),
            slot,
        })
    }

    async fn take(&self) -> DataResult<DbTransaction> {
        self.inner
            .slot
            .lock()
            .await
            .take()
            .ok_or_else(|| self.closed_error())
    }

    fn closed_error(&self) -> DataError {
        let message = if self.inner.aborted.load(Ordering::SeqCst) {
            "Transaction was rolled back after a statement timeout"
        } else {
            "Transaction was already committed or rolled back"
        };
        DataError::invalid_transaction_state(message, self.inner.id.clone())
    }

    fn metadata(&self) -> TransactionMetadata {
        TransactionMetadata {
            transaction_id: self.inner.id.clone(),
            data_source: self.inner.data_source.clone(),
            started_at: self.inner.started_at,
            duration_secs: self.inner.created.elapsed().as_secs(),
        }
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.inner.id)
            .field("data_source", &self.inner.data_source)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Metadata about an active transaction.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TransactionMetadata {
    pub transaction_id: String,
    pub data_source: String,
    pub started_at: DateTime<Utc>,
    /// Seconds since transaction started
    pub duration_secs: u64,
}

/// Begins, commits and rolls back transactions on the shared datasource.
#[derive(Clone)]
pub struct TransactionCoordinator {
    data_source: DataSource,
    active: Arc<RwLock<HashMap<String, Weak<TransactionInner>>>>,
}

impl TransactionCoordinator {
    pub fn new(data_source: DataSource) -> Self {
        Self {
            data_source,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn data_source(&self) -> &DataSource {
        &self.data_source
    }

    /// Borrow a connection and open a transaction on it.
    ///
    /// Fails with `PoolExhausted` when no connection frees up within the
    /// pool's acquire timeout.
    pub async fn begin(&self) -> DataResult<TransactionContext> {
        let tx = self.data_source.begin().await?;
        let ctx = TransactionContext::new(self.data_source.name(), tx);

        {
            let mut active = self.active.write().await;
            active.retain(|_, weak| weak.strong_count() > 0);
            active.insert(ctx.id().to_string(), Arc::downgrade(&ctx.inner));
        }

        info!(
            transaction_id = %ctx.id(),
            pool_name = %self.data_source.name(),
            "Transaction started"
        );
        Ok(ctx)
    }

    /// Commit and return the connection to the pool.
    pub async fn commit(&self, ctx: &TransactionContext) -> DataResult<()> {
        let tx = ctx.take().await?;
        self.forget(ctx).await;
        tx.commit().await?;
        info!(transaction_id = %ctx.id(), "Transaction committed");
        Ok(())
    }

    /// Roll back and return the connection to the pool.
    pub async fn rollback(&self, ctx: &TransactionContext) -> DataResult<()> {
        let tx = ctx.take().await?;
        self.forget(ctx).await;
        tx.rollback().await?;
        info!(transaction_id = %ctx.id(), "Transaction rolled back");
        Ok(())
    }

    /// Run `f` inside a transaction: commit when it returns `Ok`, roll back
    /// when it returns `Err`. The closure's error is returned as is.
    pub async fn transaction<F, Fut, T>(&self, f: F) -> DataResult<T>
    where
        F: FnOnce(TransactionContext) -> Fut,
        Fut: Future<Output = DataResult<T>>,
    {
        let ctx = self.begin().await?;
        match f(ctx.clone()).await {
            Ok(value) => {
                if ctx.is_active() {
                    self.commit(&ctx).await?;
                } else {
                    debug!(transaction_id = %ctx.id(), "Transaction ended inside closure");
                }
                Ok(value)
            }
            Err(err) => {
                if ctx.is_active() {
                    if let Err(rollback_err) = self.rollback(&ctx).await {
                        warn!(
                            transaction_id = %ctx.id(),
                            error = %rollback_err,
                            "Rollback after failure did not complete"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// List open transactions for diagnostics.
    pub async fn list_active(&self) -> Vec<TransactionMetadata> {
        let active = self.active.read().await;
        let mut listed: Vec<TransactionMetadata> = active
            .values()
            .filter_map(Weak::upgrade)
            .map(|inner| TransactionContext { inner })
            .filter(TransactionContext::is_active)
            .map(|ctx| ctx.metadata())
            .collect();
        listed.sort_by_key(|m| m.started_at);
        listed
    }

    pub async fn active_count(&self) -> usize {
        self.list_active().await.len()
    }

    async fn forget(&self, ctx: &TransactionContext) {
        self.active.write().await.remove(ctx.id());
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("data_source", &self.data_source.name())
            .finish()
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataSourceProperties;
    use std::time::Duration;

    async fn coordinator() -> TransactionCoordinator {
        let props = DataSourceProperties::new("sqlite::memory:")
            .unwrap()
            .with_connection_timeout(Duration::from_millis(200))
            .unwrap();
        TransactionCoordinator::new(DataSource::connect(&props).await.unwrap())
    }

    #[test]
    fn test_generate_transaction_id() {
        let id1 = generate_transaction_id();
        let id2 = generate_transaction_id();
        assert!(id1.starts_with("tx_"));
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn test_begin_commit_lists_and_forgets() {
        let coordinator = coordinator().await;
        let ctx = coordinator.begin().await.unwrap();
        assert!(ctx.is_active());
        assert_eq!(ctx.data_source_name(), "platform");

        let listed = coordinator.list_active().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].transaction_id, ctx.id());

        coordinator.commit(&ctx).await.unwrap();
        assert!(!ctx.is_active());
        assert_eq!(coordinator.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_second_commit_is_invalid_state() {
        let coordinator = coordinator().await;
        let ctx = coordinator.begin().await.unwrap();
        coordinator.rollback(&ctx).await.unwrap();

        let err = coordinator.commit(&ctx).await.unwrap_err();
        assert!(matches!(err, DataError::InvalidTransactionState { .. }));
        let err = coordinator.rollback(&ctx).await.unwrap_err();
        assert!(err.to_string().contains(ctx.id()));
    }

    #[tokio::test]
    async fn test_lock_after_close_fails() {
        let coordinator = coordinator().await;
        let ctx = coordinator.begin().await.unwrap();
        assert!(ctx.lock().await.is_ok());
        coordinator.commit(&ctx).await.unwrap();
        assert!(ctx.lock().await.is_err());
    }

    #[tokio::test]
    async fn test_transaction_closure_commits_and_returns_value() {
        let coordinator = coordinator().await;
        let value = coordinator
            .transaction(|ctx| async move {
                assert!(ctx.is_active());
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(coordinator.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_transaction_closure_error_rolls_back() {
        let coordinator = coordinator().await;
        let err = coordinator
            .transaction(|_ctx| async move { Err::<(), _>(DataError::invalid_input("boom")) })
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::InvalidInput { .. }));
        assert_eq!(coordinator.active_count().await, 0);

        // Connection went back to the pool (max size is 1 for SQLite).
        let ctx = coordinator.begin().await.unwrap();
        coordinator.rollback(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_aborted_transaction_rejects_further_use() {
        let coordinator = coordinator().await;
        let ctx = coordinator.begin().await.unwrap();
        {
            let mut guard = ctx.lock().await.unwrap();
            assert!(guard.as_connection().is_ok());
            guard.abort();
            assert!(guard.as_connection().is_err());
        }
        assert!(!ctx.is_active());
        let err = coordinator.rollback(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("statement timeout"));

        // The aborted transaction's connection no longer counts against the pool.
        let next = coordinator.begin().await.unwrap();
        coordinator.commit(&next).await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_context_releases_connection() {
        let coordinator = coordinator().await;
        {
            let _ctx = coordinator.begin().await.unwrap();
        }
        assert_eq!(coordinator.active_count().await, 0);
        let ctx = coordinator.begin().await.unwrap();
        coordinator.commit(&ctx).await.unwrap();
    }
}
