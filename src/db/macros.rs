//! Database dispatch macros for reducing code duplication.

/// Macro for generating `DbPool` match arms.
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => p.close().await,
///     Postgres(p) => p.close().await,
///     SQLite(p) => p.close().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Macro that forwards a `DbConnection` to the same-named function of the
/// `mysql`, `postgres` or `sqlite` module in scope at the call site.
///
/// ```ignore
/// dispatch_connection!(conn, execute(sql, params, query_timeout))
/// ```
#[macro_export]
macro_rules! dispatch_connection {
    ($conn:expr, $func:ident ( $($arg:expr),* $(,)? )) => {
        match $conn {
            $crate::db::pool::DbConnection::MySql(c) => mysql::$func(c, $($arg),*).await,
            $crate::db::pool::DbConnection::Postgres(c) => postgres::$func(c, $($arg),*).await,
            $crate::db::pool::DbConnection::SQLite(c) => sqlite::$func(c, $($arg),*).await,
        }
    };
}
