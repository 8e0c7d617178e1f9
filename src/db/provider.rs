//! Transaction-aware connection provider.
//!
//! Both query backends get their connections here. An unbound provider
//! borrows from the pool for each statement; a provider bound to a
//! `TransactionContext` hands out that transaction's connection instead and
//! never touches the pool.

use crate::db::executor;
use crate::db::pool::{DataSource, DbConnection, PooledConnection};
use crate::db::transaction::{TransactionContext, TransactionGuard};
use crate::error::{DataError, DataResult};
use crate::models::{DatabaseType, RowMap, SqlParam};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ConnectionProvider {
    data_source: DataSource,
    transaction: Option<TransactionContext>,
}

impl ConnectionProvider {
    pub fn new(data_source: DataSource) -> Self {
        Self {
            data_source,
            transaction: None,
        }
    }

    /// A provider whose statements run on `tx`'s connection.
    pub fn with_transaction(&self, tx: &TransactionContext) -> Self {
        Self {
            data_source: self.data_source.clone(),
            transaction: Some(tx.clone()),
        }
    }

    pub fn data_source(&self) -> &DataSource {
        &self.data_source
    }

    pub fn db_type(&self) -> DatabaseType {
        self.data_source.db_type()
    }

    pub fn transaction(&self) -> Option<&TransactionContext> {
        self.transaction.as_ref()
    }

    /// Get a connection for one unit of work.
    ///
    /// Inside a transaction this waits for earlier statements on the same
    /// transaction to finish and fails if the transaction has ended.
    pub async fn acquire(&self) -> DataResult<Lease> {
        match &self.transaction {
            Some(tx) => tx.lock().await.map(Lease::Transactional),
            None => self.data_source.acquire().await.map(Lease::Pooled),
        }
    }
}

/// A connection held for the duration of one unit of work.
///
/// Statements run through the lease. A statement that times out leaves the
/// connection busy, so the lease throws the connection away instead of
/// handing it back: a pooled connection is detached from the pool, and a
/// transaction is ended.
#[derive(Debug)]
pub enum Lease {
    /// Borrowed from the pool; returned when the lease is dropped.
    Pooled(PooledConnection),
    /// The bound transaction's connection; released to the next statement
    /// when the lease is dropped.
    Transactional(TransactionGuard),
    /// Thrown away after a statement timeout.
    Discarded,
}

impl Lease {
    pub fn connection(&mut self) -> DataResult<DbConnection<'_>> {
        match self {
            Lease::Pooled(conn) => Ok(conn.as_connection()),
            Lease::Transactional(tx) => tx.as_connection(),
            Lease::Discarded => Err(DataError::internal(
                "connection was discarded after a statement timeout",
            )),
        }
    }

    pub fn is_transactional(&self) -> bool {
        matches!(self, Lease::Transactional(_))
    }

    pub async fn fetch_rows(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        query_timeout: Duration,
    ) -> DataResult<Vec<RowMap>> {
        let result = executor::fetch_rows(self.connection()?, sql, params, query_timeout).await;
        self.settle(result)
    }

    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        query_timeout: Duration,
    ) -> DataResult<u64> {
        let result = executor::execute(self.connection()?, sql, params, query_timeout).await;
        self.settle(result)
    }

    fn settle<T>(&mut self, result: DataResult<T>) -> DataResult<T> {
        if matches!(result, Err(DataError::QueryTimeout { .. })) {
            self.discard();
        }
        result
    }

    fn discard(&mut self) {
        match std::mem::replace(self, Lease::Discarded) {
            Lease::Pooled(conn) => {
                warn!(db_type = %conn.db_type(), "Statement timed out; closing its connection");
                conn.discard();
            }
            Lease::Transactional(mut tx) => tx.abort(),
            Lease::Discarded => {}
        }
    }
}
