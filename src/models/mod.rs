//! Data models shared by both query backends.

pub mod database;
pub mod param;

pub use database::DatabaseType;
pub use param::{RowMap, SqlParam};
