//! Binding `SqlParam` values onto sqlx queries.
//!
//! One generic binder serves all three drivers; the bounds list the Rust
//! types a `SqlParam` can encode to.

use crate::models::SqlParam;
use sqlx::query::Query;
use sqlx::{Database, Encode, Type};

/// Bind one parameter. NULL is sent as a text NULL, which every supported
/// driver accepts for any column type.
pub(crate) fn bind_param<'q, DB>(
    query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    param: &'q SqlParam,
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
{
    match param {
        SqlParam::Null => query.bind(None::<String>),
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::String(v) => query.bind(v.as_str()),
        SqlParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind every parameter in order.
pub(crate) fn bind_all<'q, DB>(
    query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    params: &'q [SqlParam],
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
{
    params.iter().fold(query, |query, param| bind_param(query, param))
}
