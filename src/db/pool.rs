//! Connection pool management.
//!
//! One `DataSource` owns one database-specific pool (MySqlPool, PgPool,
//! SqlitePool) for the single logical database. Connections are lent out as
//! `PooledConnection`s and go back to the pool when dropped, on every path.

use crate::config::DataSourceProperties;
use crate::db::transaction::DbTransaction;
use crate::error::{DataError, DataResult};
use crate::models::DatabaseType;
use sqlx::pool::PoolConnection;
use sqlx::{
    MySql, MySqlConnection, MySqlPool, PgConnection, PgPool, Postgres, Sqlite, SqliteConnection,
    SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions, postgres::PgPoolOptions,
    sqlite::SqliteConnectOptions, sqlite::SqliteJournalMode, sqlite::SqlitePoolOptions,
};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.close().await,
            Postgres(pool) => pool.close().await,
            SQLite(pool) => pool.close().await,
        })
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.is_closed(),
            Postgres(pool) => pool.is_closed(),
            SQLite(pool) => pool.is_closed(),
        })
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    fn size_and_idle(&self) -> (u32, usize) {
        impl_db_dispatch!(self, {
            MySql(pool) => (pool.size(), pool.num_idle()),
            Postgres(pool) => (pool.size(), pool.num_idle()),
            SQLite(pool) => (pool.size(), pool.num_idle()),
        })
    }
}

/// A connection borrowed from the pool. Returned to the pool on drop.
#[derive(Debug)]
pub enum PooledConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl PooledConnection {
    pub fn as_connection(&mut self) -> DbConnection<'_> {
        match self {
            PooledConnection::MySql(conn) => DbConnection::MySql(&mut **conn),
            PooledConnection::Postgres(conn) => DbConnection::Postgres(&mut **conn),
            PooledConnection::SQLite(conn) => DbConnection::SQLite(&mut **conn),
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            PooledConnection::MySql(_) => DatabaseType::MySQL,
            PooledConnection::Postgres(_) => DatabaseType::PostgreSQL,
            PooledConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Take the connection out of the pool and close it. Its slot is freed
    /// at once, even if the connection is still busy with a statement.
    pub fn discard(self) {
        match self {
            PooledConnection::MySql(conn) => drop(conn.detach()),
            PooledConnection::Postgres(conn) => drop(conn.detach()),
            PooledConnection::SQLite(conn) => drop(conn.detach()),
        }
    }
}

/// Mutable access to a live connection, wherever it was borrowed from.
#[derive(Debug)]
pub enum DbConnection<'c> {
    MySql(&'c mut MySqlConnection),
    Postgres(&'c mut PgConnection),
    SQLite(&'c mut SqliteConnection),
}

impl DbConnection<'_> {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    /// Open connections, idle or in use.
    pub size: u32,
    pub idle: usize,
    /// Total connections lent out since the pool was created.
    pub leases_total: u64,
}

#[derive(Debug)]
struct DataSourceInner {
    name: String,
    pool: DbPool,
    acquire_timeout: Duration,
    leases: AtomicU64,
}

/// The single logical datasource shared by both query backends.
#[derive(Debug, Clone)]
pub struct DataSource {
    inner: Arc<DataSourceInner>,
}

impl DataSource {
    /// Create the pool for `props` and open `minimum_idle` connections.
    pub async fn connect(props: &DataSourceProperties) -> DataResult<Self> {
        props.validate()?;

        info!(
            pool_name = %props.pool_name,
            db_type = %props.db_type,
            url = %props.masked_url(),
            max_size = props.maximum_pool_size,
            min_idle = props.minimum_idle,
            "Creating connection pool"
        );

        let pool = create_pool(props).await?;

        info!(pool_name = %props.pool_name, "Connection pool ready");

        Ok(Self::from_pool(
            props.pool_name.clone(),
            pool,
            props.connection_timeout,
        ))
    }

    /// Wrap an already built pool.
    pub fn from_pool(name: impl Into<String>, pool: DbPool, acquire_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(DataSourceInner {
                name: name.into(),
                pool,
                acquire_timeout,
                leases: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn db_type(&self) -> DatabaseType {
        self.inner.pool.db_type()
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.inner.acquire_timeout
    }

    pub fn pool(&self) -> &DbPool {
        &self.inner.pool
    }

    /// Borrow a connection, waiting at most the acquire timeout.
    pub async fn acquire(&self) -> DataResult<PooledConnection> {
        let conn = match &self.inner.pool {
            DbPool::MySql(pool) => pool.acquire().await.map(PooledConnection::MySql),
            DbPool::Postgres(pool) => pool.acquire().await.map(PooledConnection::Postgres),
            DbPool::SQLite(pool) => pool.acquire().await.map(PooledConnection::SQLite),
        }
        .map_err(|e| self.map_acquire_error(e))?;

        let lease = self.inner.leases.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(pool_name = %self.inner.name, lease, "Connection borrowed");
        Ok(conn)
    }

    /// Borrow a connection and open a transaction on it.
    pub(crate) async fn begin(&self) -> DataResult<DbTransaction> {
        let conn = self.acquire().await?;
        DbTransaction::begin(conn).await
    }

    /// Number of connections lent out so far.
    pub fn lease_count(&self) -> u64 {
        self.inner.leases.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PoolStatus {
        let (size, idle) = self.inner.pool.size_and_idle();
        PoolStatus {
            size,
            idle,
            leases_total: self.lease_count(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }

    /// Close the pool. Waits for borrowed connections to come back.
    pub async fn close(&self) {
        info!(pool_name = %self.inner.name, "Closing connection pool");
        self.inner.pool.close().await;
    }

    fn map_acquire_error(&self, err: sqlx::Error) -> DataError {
        match err {
            sqlx::Error::PoolTimedOut => {
                DataError::pool_exhausted(&self.inner.name, self.inner.acquire_timeout)
            }
            other => DataError::from(other),
        }
    }
}

async fn create_pool(props: &DataSourceProperties) -> DataResult<DbPool> {
    match props.db_type {
        DatabaseType::MySQL => {
            let options = MySqlConnectOptions::from_str(&props.url)
                .map_err(|e| {
                    DataError::configuration(
                        format!("Invalid MySQL connection string: {}", e),
                        "url",
                    )
                })?
                .charset("utf8mb4");

            let pool = MySqlPoolOptions::new()
                .min_connections(props.minimum_idle)
                .max_connections(props.maximum_pool_size)
                .acquire_timeout(props.connection_timeout)
                .idle_timeout(props.idle_timeout)
                .max_lifetime(props.max_lifetime)
                .test_before_acquire(props.validate_on_acquire)
                .connect_with(options)
                .await
                .map_err(|e| connect_error(props.db_type, e))?;
            Ok(DbPool::MySql(pool))
        }
        DatabaseType::PostgreSQL => {
            let pool = PgPoolOptions::new()
                .min_connections(props.minimum_idle)
                .max_connections(props.maximum_pool_size)
                .acquire_timeout(props.connection_timeout)
                .idle_timeout(props.idle_timeout)
                .max_lifetime(props.max_lifetime)
                .test_before_acquire(props.validate_on_acquire)
                .connect(&props.url)
                .await
                .map_err(|e| connect_error(props.db_type, e))?;
            Ok(DbPool::Postgres(pool))
        }
        DatabaseType::SQLite => {
            let options = SqliteConnectOptions::from_str(&props.url)
                .map_err(|e| {
                    DataError::configuration(
                        format!("Invalid SQLite connection string: {}", e),
                        "url",
                    )
                })?
                .create_if_missing(true)
                // A closed reader may still be finishing its statement; WAL keeps it from blocking writers.
                .journal_mode(SqliteJournalMode::Wal);

            let pool = SqlitePoolOptions::new()
                .min_connections(props.minimum_idle)
                .max_connections(props.maximum_pool_size)
                .acquire_timeout(props.connection_timeout)
                .idle_timeout(props.idle_timeout)
                .max_lifetime(props.max_lifetime)
                .test_before_acquire(props.validate_on_acquire)
                .connect_with(options)
                .await
                .map_err(|e| connect_error(props.db_type, e))?;
            Ok(DbPool::SQLite(pool))
        }
    }
}

fn connect_error(db_type: DatabaseType, err: sqlx::Error) -> DataError {
    let err_str = err.to_string().to_lowercase();

    let suggestion = if err_str.contains("password") || err_str.contains("authentication") {
        "Check the datasource username and password"
    } else if err_str.contains("connection refused") {
        match db_type {
            DatabaseType::PostgreSQL => "Ensure PostgreSQL is running and accepting connections",
            DatabaseType::MySQL => "Ensure MySQL is running and accepting connections",
            DatabaseType::SQLite => "Check the database file path",
        }
    } else if err_str.contains("timeout") || err_str.contains("timed out") {
        "The server did not answer; check the network and connection-timeout"
    } else {
        "Check the datasource url and that the database server is reachable"
    };

    DataError::connection(format!("Failed to connect: {}", err), suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_source(max: u32) -> DataSource {
        let props = DataSourceProperties::new("sqlite::memory:")
            .unwrap()
            .with_pool_size(1, max)
            .unwrap()
            .with_connection_timeout(Duration::from_millis(200))
            .unwrap();
        DataSource::connect(&props).await.unwrap()
    }

    #[tokio::test]
    async fn test_acquire_counts_leases() {
        let ds = memory_source(2).await;
        assert_eq!(ds.lease_count(), 0);
        {
            let _a = ds.acquire().await.unwrap();
            let _b = ds.acquire().await.unwrap();
        }
        assert_eq!(ds.lease_count(), 2);
        assert_eq!(ds.status().leases_total, 2);
        assert_eq!(ds.db_type(), DatabaseType::SQLite);
    }

    #[tokio::test]
    async fn test_connection_returned_on_drop() {
        let ds = memory_source(1).await;
        {
            let mut conn = ds.acquire().await.unwrap();
            assert_eq!(conn.as_connection().db_type(), DatabaseType::SQLite);
        }
        // The only connection is back, so this does not time out.
        let _again = ds.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_discarded_connection_frees_its_slot() {
        let ds = memory_source(1).await;
        let conn = ds.acquire().await.unwrap();
        assert_eq!(conn.db_type(), DatabaseType::SQLite);
        conn.discard();
        let _fresh = ds.acquire().await.unwrap();
        assert_eq!(ds.lease_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_pool_reports_pool_name() {
        let ds = memory_source(1).await;
        let _held = ds.acquire().await.unwrap();
        let err = ds.acquire().await.unwrap_err();
        assert!(matches!(err, DataError::PoolExhausted { .. }));
        assert!(err.to_string().contains("'platform'"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let ds = memory_source(1).await;
        ds.close().await;
        assert!(ds.is_closed());
        let err = ds.acquire().await.unwrap_err();
        assert!(matches!(err, DataError::Connection { .. }));
    }
}
