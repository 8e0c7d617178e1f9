//! Statement descriptions built by the fluent API.
//!
//! These are plain data; they render to SQL against a dialect and can be
//! collected for `DslContext::batch`.

use crate::dsl::condition::Condition;
use crate::dsl::table::Table;
use crate::models::SqlParam;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    /// Empty selects every column.
    pub columns: Vec<String>,
    pub table: Table,
    pub condition: Condition,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertQuery {
    pub table: Table,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlParam>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateQuery {
    pub table: Table,
    pub assignments: Vec<(String, SqlParam)>,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteQuery {
    pub table: Table,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(SelectQuery),
    Insert(InsertQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl Query {
    pub fn kind(&self) -> QueryKind {
        match self {
            Self::Select(_) => QueryKind::Select,
            Self::Insert(_) => QueryKind::Insert,
            Self::Update(_) => QueryKind::Update,
            Self::Delete(_) => QueryKind::Delete,
        }
    }
}

impl From<SelectQuery> for Query {
    fn from(q: SelectQuery) -> Self {
        Self::Select(q)
    }
}

impl From<InsertQuery> for Query {
    fn from(q: InsertQuery) -> Self {
        Self::Insert(q)
    }
}

impl From<UpdateQuery> for Query {
    fn from(q: UpdateQuery) -> Self {
        Self::Update(q)
    }
}

impl From<DeleteQuery> for Query {
    fn from(q: DeleteQuery) -> Self {
        Self::Delete(q)
    }
}
