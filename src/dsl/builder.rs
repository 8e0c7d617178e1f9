//! Fluent statement builders bound to a `DslContext`.

use crate::dsl::condition::Condition;
use crate::dsl::context::DslContext;
use crate::dsl::query::{DeleteQuery, InsertQuery, OrderBy, Query, SelectQuery, UpdateQuery};
use crate::dsl::table::Table;
use crate::error::DataResult;
use crate::models::{RowMap, SqlParam};
use serde::de::DeserializeOwned;

/// `SELECT <columns>` waiting for its table.
pub struct SelectColumns<'a> {
    ctx: &'a DslContext,
    columns: Vec<String>,
}

impl<'a> SelectColumns<'a> {
    pub(crate) fn new(ctx: &'a DslContext, columns: Vec<String>) -> Self {
        Self { ctx, columns }
    }

    pub fn from(self, table: &Table) -> Select<'a> {
        Select {
            ctx: self.ctx,
            query: SelectQuery {
                columns: self.columns,
                table: table.clone(),
                condition: Condition::none(),
                order_by: Vec::new(),
                limit: None,
                offset: None,
            },
        }
    }
}

pub struct Select<'a> {
    ctx: &'a DslContext,
    query: SelectQuery,
}

impl<'a> Select<'a> {
    /// Replace the predicate.
    pub fn where_(mut self, condition: Condition) -> Self {
        self.query.condition = condition;
        self
    }

    /// AND another predicate onto the current one.
    pub fn and_where(mut self, condition: Condition) -> Self {
        self.query.condition = std::mem::take(&mut self.query.condition).and(condition);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.query.order_by.push(OrderBy {
            column: column.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.query.order_by.push(OrderBy {
            column: column.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.query.offset = Some(offset);
        self
    }

    pub fn query(&self) -> &SelectQuery {
        &self.query
    }

    pub fn into_query(self) -> SelectQuery {
        self.query
    }

    pub async fn fetch_maps(self) -> DataResult<Vec<RowMap>> {
        self.ctx.fetch_query(&self.query).await
    }

    /// Fetch every row into `R` through serde; column labels must match
    /// `R`'s field names.
    pub async fn fetch_into<R: DeserializeOwned>(self) -> DataResult<Vec<R>> {
        self.ctx.fetch_query_into(&self.query).await
    }

    /// Fetch at most one row. No row is `Ok(None)`; more than one is a
    /// mapping error.
    pub async fn fetch_optional_into<R: DeserializeOwned>(self) -> DataResult<Option<R>> {
        self.ctx.fetch_query_optional_into(&self.query).await
    }

    /// Count the rows this select would return.
    pub async fn fetch_count(self) -> DataResult<i64> {
        self.ctx.fetch_query_count(&self.query).await
    }
}

pub struct Insert<'a> {
    ctx: &'a DslContext,
    query: InsertQuery,
}

impl<'a> Insert<'a> {
    pub(crate) fn new(ctx: &'a DslContext, table: &Table) -> Self {
        Self {
            ctx,
            query: InsertQuery {
                table: table.clone(),
                columns: Vec::new(),
                rows: Vec::new(),
            },
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add one row; call repeatedly for a multi-row insert.
    pub fn values(mut self, row: Vec<SqlParam>) -> Self {
        self.query.rows.push(row);
        self
    }

    pub fn into_query(self) -> InsertQuery {
        self.query
    }

    pub async fn execute(self) -> DataResult<u64> {
        self.ctx.execute_query(Query::Insert(self.query)).await
    }
}

pub struct Update<'a> {
    ctx: &'a DslContext,
    query: UpdateQuery,
}

impl<'a> Update<'a> {
    pub(crate) fn new(ctx: &'a DslContext, table: &Table) -> Self {
        Self {
            ctx,
            query: UpdateQuery {
                table: table.clone(),
                assignments: Vec::new(),
                condition: Condition::none(),
            },
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<SqlParam>) -> Self {
        self.query.assignments.push((column.into(), value.into()));
        self
    }

    pub fn where_(mut self, condition: Condition) -> Self {
        self.query.condition = condition;
        self
    }

    pub fn and_where(mut self, condition: Condition) -> Self {
        self.query.condition = std::mem::take(&mut self.query.condition).and(condition);
        self
    }

    pub fn into_query(self) -> UpdateQuery {
        self.query
    }

    /// Run the update. Without a WHERE clause the update policy decides
    /// whether it runs at all.
    pub async fn execute(self) -> DataResult<u64> {
        self.ctx.execute_query(Query::Update(self.query)).await
    }
}

pub struct Delete<'a> {
    ctx: &'a DslContext,
    query: DeleteQuery,
}

impl<'a> Delete<'a> {
    pub(crate) fn new(ctx: &'a DslContext, table: &Table) -> Self {
        Self {
            ctx,
            query: DeleteQuery {
                table: table.clone(),
                condition: Condition::none(),
            },
        }
    }

    pub fn where_(mut self, condition: Condition) -> Self {
        self.query.condition = condition;
        self
    }

    pub fn and_where(mut self, condition: Condition) -> Self {
        self.query.condition = std::mem::take(&mut self.query.condition).and(condition);
        self
    }

    pub fn into_query(self) -> DeleteQuery {
        self.query
    }

    /// Run the delete. Without a WHERE clause the delete policy decides
    /// whether it runs at all.
    pub async fn execute(self) -> DataResult<u64> {
        self.ctx.execute_query(Query::Delete(self.query)).await
    }
}

impl From<Select<'_>> for Query {
    fn from(s: Select<'_>) -> Self {
        Query::Select(s.query)
    }
}

impl From<Insert<'_>> for Query {
    fn from(i: Insert<'_>) -> Self {
        Query::Insert(i.query)
    }
}

impl From<Update<'_>> for Query {
    fn from(u: Update<'_>) -> Self {
        Query::Update(u.query)
    }
}

impl From<Delete<'_>> for Query {
    fn from(d: Delete<'_>) -> Self {
        Query::Delete(d.query)
    }
}
