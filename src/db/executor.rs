//! Statement execution.
//!
//! Runs a SQL string with bound `SqlParam`s on a borrowed connection under
//! a timeout. When the timeout fires the statement future is dropped and
//! `QueryTimeout` is returned; nothing is retried. The connection may still
//! be busy on the server side, so callers go through `Lease`, which closes
//! it instead of returning it to the pool.
//!
//! # Architecture
//!
//! Database-specific implementations live in submodules (`mysql`,
//! `postgres`, `sqlite`) with identical shapes; `dispatch_connection!`
//! selects one from the `DbConnection` variant.

use crate::db::params::bind_all;
use crate::db::pool::DbConnection;
use crate::db::types::RowToJson;
use crate::error::{DataError, DataResult};
use crate::models::{RowMap, SqlParam};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Run a row-returning statement and decode every row.
pub async fn fetch_rows(
    conn: DbConnection<'_>,
    sql: &str,
    params: &[SqlParam],
    query_timeout: Duration,
) -> DataResult<Vec<RowMap>> {
    let start = Instant::now();
    debug!(
        sql = %sql,
        params = params.len(),
        timeout_ms = query_timeout.as_millis() as u64,
        "Executing query"
    );

    let rows = dispatch_connection!(conn, fetch_rows(sql, params, query_timeout))?;

    debug!(
        rows = rows.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Query finished"
    );
    Ok(rows)
}

/// Run a write statement and return the affected row count.
pub async fn execute(
    conn: DbConnection<'_>,
    sql: &str,
    params: &[SqlParam],
    query_timeout: Duration,
) -> DataResult<u64> {
    let start = Instant::now();
    debug!(
        sql = %sql,
        params = params.len(),
        timeout_ms = query_timeout.as_millis() as u64,
        "Executing write operation"
    );

    let rows_affected = dispatch_connection!(conn, execute(sql, params, query_timeout))?;

    debug!(
        rows_affected,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Write finished"
    );
    Ok(rows_affected)
}

fn timeout_error(sql: &str, query_timeout: Duration) -> DataError {
    DataError::query_timeout(sql, query_timeout)
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// When params is empty the SQL runs unprepared, which also allows several
// statements in one string.

mod mysql {
    use super::*;
    use sqlx::{Executor, MySql, MySqlConnection};

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[SqlParam],
        query_timeout: Duration,
    ) -> DataResult<Vec<RowMap>> {
        let rows_future = async {
            if params.is_empty() {
                (&mut *conn).fetch_all(sql).await
            } else {
                bind_all(sqlx::query::<MySql>(sql), params).fetch_all(&mut *conn).await
            }
        };

        match timeout(query_timeout, rows_future).await {
            Ok(Ok(rows)) => Ok(rows.iter().map(RowToJson::to_json_map).collect()),
            Ok(Err(e)) => Err(DataError::from(e)),
            Err(_) => Err(timeout_error(sql, query_timeout)),
        }
    }

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[SqlParam],
        query_timeout: Duration,
    ) -> DataResult<u64> {
        let write_future = async {
            if params.is_empty() {
                (&mut *conn).execute(sql).await
            } else {
                bind_all(sqlx::query::<MySql>(sql), params).execute(&mut *conn).await
            }
        };

        match timeout(query_timeout, write_future).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DataError::from(e)),
            Err(_) => Err(timeout_error(sql, query_timeout)),
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::{Executor, PgConnection, Postgres};

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[SqlParam],
        query_timeout: Duration,
    ) -> DataResult<Vec<RowMap>> {
        let rows_future = async {
            if params.is_empty() {
                (&mut *conn).fetch_all(sql).await
            } else {
                bind_all(sqlx::query::<Postgres>(sql), params).fetch_all(&mut *conn).await
            }
        };

        match timeout(query_timeout, rows_future).await {
            Ok(Ok(rows)) => Ok(rows.iter().map(RowToJson::to_json_map).collect()),
            Ok(Err(e)) => Err(DataError::from(e)),
            Err(_) => Err(timeout_error(sql, query_timeout)),
        }
    }

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: &[SqlParam],
        query_timeout: Duration,
    ) -> DataResult<u64> {
        let write_future = async {
            if params.is_empty() {
                (&mut *conn).execute(sql).await
            } else {
                bind_all(sqlx::query::<Postgres>(sql), params).execute(&mut *conn).await
            }
        };

        match timeout(query_timeout, write_future).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DataError::from(e)),
            Err(_) => Err(timeout_error(sql, query_timeout)),
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Executor, Sqlite, SqliteConnection};

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlParam],
        query_timeout: Duration,
    ) -> DataResult<Vec<RowMap>> {
        let rows_future = async {
            if params.is_empty() {
                (&mut *conn).fetch_all(sql).await
            } else {
                bind_all(sqlx::query::<Sqlite>(sql), params).fetch_all(&mut *conn).await
            }
        };

        match timeout(query_timeout, rows_future).await {
            Ok(Ok(rows)) => Ok(rows.iter().map(RowToJson::to_json_map).collect()),
            Ok(Err(e)) => Err(DataError::from(e)),
            Err(_) => Err(timeout_error(sql, query_timeout)),
        }
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlParam],
        query_timeout: Duration,
    ) -> DataResult<u64> {
        let write_future = async {
            if params.is_empty() {
                (&mut *conn).execute(sql).await
            } else {
                bind_all(sqlx::query::<Sqlite>(sql), params).execute(&mut *conn).await
            }
        };

        match timeout(query_timeout, write_future).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DataError::from(e)),
            Err(_) => Err(timeout_error(sql, query_timeout)),
        }
    }
}
