//! Query backend A: a fluent, dialect-aware SQL builder.
//!
//! ```ignore
//! let user = Table::new("user");
//! let rows: Vec<UserRecord> = dsl
//!     .select(["id", "user_id", "name"])
//!     .from(&user)
//!     .where_(Condition::eq("status", 1))
//!     .fetch_into()
//!     .await?;
//! ```
//!
//! UPDATE and DELETE without a WHERE clause are rejected by default
//! (`WithoutWhere::Throw`) before any connection is borrowed.

pub mod builder;
pub mod condition;
pub mod context;
pub mod guard;
pub mod named;
pub mod query;
pub mod render;
pub mod settings;
pub mod table;

pub use builder::{Delete, Insert, Select, SelectColumns, Update};
pub use condition::{CompareOp, Condition};
pub use context::DslContext;
pub use guard::GuardedOperation;
pub use named::NamedSql;
pub use query::{DeleteQuery, InsertQuery, OrderBy, Query, QueryKind, SelectQuery, UpdateQuery};
pub use render::RenderedQuery;
pub use settings::{QuerySettings, WithoutWhere};
pub use table::Table;
