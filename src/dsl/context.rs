//! The query builder entry point.
//!
//! A `DslContext` pairs a connection provider with fixed `QuerySettings`.
//! Every statement is rendered and guard-checked before a connection is
//! borrowed, so a rejected statement never touches the pool.

use crate::db::{ConnectionProvider, TransactionContext};
use crate::dsl::builder::{Delete, Insert, Select, SelectColumns, Update};
use crate::dsl::condition::Condition;
use crate::dsl::guard::{self, GuardedOperation};
use crate::dsl::named::{self, NamedSql};
use crate::dsl::query::{InsertQuery, Query, QueryKind, SelectQuery};
use crate::dsl::render::{RenderedQuery, Renderer};
use crate::dsl::settings::QuerySettings;
use crate::dsl::table::Table;
use crate::error::{DataError, DataResult};
use crate::models::{DatabaseType, RowMap, SqlParam};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DslContext {
    provider: ConnectionProvider,
    settings: Arc<QuerySettings>,
}

impl DslContext {
    /// Build a context. Invalid settings fail here, not on first use.
    pub fn new(provider: ConnectionProvider, settings: QuerySettings) -> DataResult<Self> {
        settings.validate()?;
        info!(
            pool_name = %provider.data_source().name(),
            db_type = %provider.db_type(),
            batch_size = settings.batch_size(),
            query_timeout_ms = settings.query_timeout().as_millis() as u64,
            "Query builder context ready"
        );
        Ok(Self {
            provider,
            settings: Arc::new(settings),
        })
    }

    /// A context whose statements run on `tx`'s connection.
    pub fn with_transaction(&self, tx: &TransactionContext) -> Self {
        Self {
            provider: self.provider.with_transaction(tx),
            settings: Arc::clone(&self.settings),
        }
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    pub fn provider(&self) -> &ConnectionProvider {
        &self.provider
    }

    pub fn db_type(&self) -> DatabaseType {
        self.provider.db_type()
    }

    // =========================================================================
    // Builders
    // =========================================================================

    pub fn select<I, S>(&self, columns: I) -> SelectColumns<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SelectColumns::new(self, columns.into_iter().map(Into::into).collect())
    }

    /// `SELECT * FROM table`
    pub fn select_from(&self, table: &Table) -> Select<'_> {
        SelectColumns::new(self, Vec::new()).from(table)
    }

    pub fn insert_into(&self, table: &Table) -> Insert<'_> {
        Insert::new(self, table)
    }

    pub fn update(&self, table: &Table) -> Update<'_> {
        Update::new(self, table)
    }

    pub fn delete_from(&self, table: &Table) -> Delete<'_> {
        Delete::new(self, table)
    }

    /// Render a statement for this context's dialect and apply the write
    /// guard to it.
    pub fn render(&self, query: &Query) -> DataResult<RenderedQuery> {
        let rendered = Renderer::new(self.db_type(), self.settings.render_schema()).render(query)?;
        self.guard(&rendered)?;
        self.log_rendered(&rendered);
        Ok(rendered)
    }

    fn guard(&self, rendered: &RenderedQuery) -> DataResult<()> {
        let operation = match rendered.kind {
            QueryKind::Delete => GuardedOperation::Delete,
            QueryKind::Update => GuardedOperation::Update,
            QueryKind::Select | QueryKind::Insert => return Ok(()),
        };
        guard::check_statement(operation, rendered.has_where, &rendered.sql, &self.settings)
    }

    fn log_rendered(&self, rendered: &RenderedQuery) {
        if self.settings.render_formatted() {
            debug!("Rendered statement:\n{}", rendered.formatted);
        }
    }

    // =========================================================================
    // Execution
    // =========================================================================

    pub(crate) async fn fetch_query(&self, query: &SelectQuery) -> DataResult<Vec<RowMap>> {
        let rendered = self.render(&Query::Select(query.clone()))?;
        self.fetch_rendered(&rendered).await
    }

    pub(crate) async fn fetch_query_into<R: DeserializeOwned>(
        &self,
        query: &SelectQuery,
    ) -> DataResult<Vec<R>> {
        let rendered = self.render(&Query::Select(query.clone()))?;
        let rows = self.fetch_rendered(&rendered).await?;
        rows.into_iter()
            .map(|row| materialize(&rendered.sql, row))
            .collect()
    }

    pub(crate) async fn fetch_query_optional_into<R: DeserializeOwned>(
        &self,
        query: &SelectQuery,
    ) -> DataResult<Option<R>> {
        let rendered = self.render(&Query::Select(query.clone()))?;
        let mut rows = self.fetch_rendered(&rendered).await?;
        if rows.len() > 1 {
            return Err(DataError::mapping(
                rendered.sql,
                format!("expected at most one row, got {}", rows.len()),
            ));
        }
        rows.pop()
            .map(|row| materialize(&rendered.sql, row))
            .transpose()
    }

    pub(crate) async fn fetch_query_count(&self, query: &SelectQuery) -> DataResult<i64> {
        let rendered = Renderer::new(self.db_type(), self.settings.render_schema())
            .render_count(query)?;
        self.log_rendered(&rendered);
        let rows = self.fetch_rendered(&rendered).await?;
        rows.first()
            .and_then(|row| row.values().next())
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| DataError::mapping(rendered.sql, "COUNT(*) returned no integer"))
    }

    pub(crate) async fn execute_query(&self, query: Query) -> DataResult<u64> {
        if query.kind() == QueryKind::Select {
            return Err(DataError::invalid_input("SELECT cannot be executed as a write"));
        }
        let rendered = self.render(&query)?;
        let mut lease = self.provider.acquire().await?;
        lease
            .execute(&rendered.sql, &rendered.params, self.settings.query_timeout())
            .await
    }

    async fn fetch_rendered(&self, rendered: &RenderedQuery) -> DataResult<Vec<RowMap>> {
        let mut lease = self.provider.acquire().await?;
        lease
            .fetch_rows(&rendered.sql, &rendered.params, self.settings.query_timeout())
            .await
    }

    /// `SELECT COUNT(*) FROM table WHERE condition`
    pub async fn fetch_count(&self, table: &Table, condition: Condition) -> DataResult<i64> {
        self.select_from(table).where_(condition).fetch_count().await
    }

    /// Run raw SQL. Every UPDATE/DELETE in it goes through the write guard
    /// first; `?` placeholders are numbered for the dialect.
    pub async fn execute_sql(&self, sql: &str, params: &[SqlParam]) -> DataResult<u64> {
        let sql = self.checked_raw(sql)?;
        let mut lease = self.provider.acquire().await?;
        lease.execute(&sql, params, self.settings.query_timeout()).await
    }

    /// Run a raw row-returning statement under the same guard as `execute_sql`.
    pub async fn fetch_sql(&self, sql: &str, params: &[SqlParam]) -> DataResult<Vec<RowMap>> {
        let sql = self.checked_raw(sql)?;
        let mut lease = self.provider.acquire().await?;
        lease.fetch_rows(&sql, params, self.settings.query_timeout()).await
    }

    /// Run raw SQL with `:name` parameters.
    ///
    /// ```ignore
    /// dsl.execute_named(
    ///     "UPDATE user SET status = :status WHERE user_id = :userId",
    ///     [("status", "LOCKED"), ("userId", "u-100")],
    /// ).await?;
    /// ```
    pub async fn execute_named<I, K, V>(&self, sql: &str, params: I) -> DataResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlParam>,
    {
        let (sql, bound) = self.checked_named(sql, params)?;
        let mut lease = self.provider.acquire().await?;
        lease.execute(&sql, &bound, self.settings.query_timeout()).await
    }

    /// Row-returning counterpart of `execute_named`.
    pub async fn fetch_named<I, K, V>(&self, sql: &str, params: I) -> DataResult<Vec<RowMap>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlParam>,
    {
        let (sql, bound) = self.checked_named(sql, params)?;
        let mut lease = self.provider.acquire().await?;
        lease.fetch_rows(&sql, &bound, self.settings.query_timeout()).await
    }

    fn checked_raw(&self, sql: &str) -> DataResult<String> {
        guard::check_raw_sql(sql, self.db_type(), &self.settings)?;
        named::number_positional(sql, self.db_type())
    }

    fn checked_named<I, K, V>(&self, sql: &str, params: I) -> DataResult<(String, Vec<SqlParam>)>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlParam>,
    {
        let named = NamedSql::parse(sql, self.db_type())?;
        guard::check_raw_sql(named.sql(), self.db_type(), &self.settings)?;
        let params: HashMap<String, SqlParam> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let bound = named.bind(&params)?;
        debug!(sql = %named.sql(), params = bound.len(), "Compiled named statement");
        Ok((named.sql().to_string(), bound))
    }

    // =========================================================================
    // Batch
    // =========================================================================

    /// Run write statements in chunks of `batch_size`, one connection lease
    /// per chunk. All statements are rendered and guard-checked before the
    /// first one runs. Returns the affected row count of each statement.
    pub async fn batch(&self, queries: Vec<Query>) -> DataResult<Vec<u64>> {
        if queries.iter().any(|q| q.kind() == QueryKind::Select) {
            return Err(DataError::invalid_input("batch accepts only write statements"));
        }
        let rendered = queries
            .iter()
            .map(|q| self.render(q))
            .collect::<DataResult<Vec<_>>>()?;
        self.run_chunks(&rendered).await
    }

    /// Insert `rows` as one multi-row INSERT per chunk of `batch_size` rows.
    /// Returns the total number of inserted rows.
    pub async fn batch_insert<I, S>(
        &self,
        table: &Table,
        columns: I,
        rows: Vec<Vec<SqlParam>>,
    ) -> DataResult<u64>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if rows.is_empty() {
            return Ok(0);
        }
        let rendered = rows
            .chunks(self.settings.batch_size())
            .map(|chunk| {
                self.render(&Query::Insert(InsertQuery {
                    table: table.clone(),
                    columns: columns.clone(),
                    rows: chunk.to_vec(),
                }))
            })
            .collect::<DataResult<Vec<_>>>()?;

        // Each rendered INSERT is already one chunk.
        let mut total = 0;
        for (idx, statement) in rendered.iter().enumerate() {
            let mut lease = self.provider.acquire().await?;
            total += lease
                .execute(&statement.sql, &statement.params, self.settings.query_timeout())
                .await?;
            debug!(chunk = idx, table = %table, "Batch insert chunk executed");
        }

        info!(table = %table, rows = rows.len(), chunks = rendered.len(), "Batch insert finished");
        Ok(total)
    }

    async fn run_chunks(&self, statements: &[RenderedQuery]) -> DataResult<Vec<u64>> {
        let mut counts = Vec::with_capacity(statements.len());
        let mut chunks = 0;
        for chunk in statements.chunks(self.settings.batch_size()) {
            let mut lease = self.provider.acquire().await?;
            for statement in chunk {
                counts.push(
                    lease
                        .execute(&statement.sql, &statement.params, self.settings.query_timeout())
                        .await?,
                );
            }
            chunks += 1;
            debug!(chunk = chunks, statements = chunk.len(), "Batch chunk executed");
        }
        info!(statements = counts.len(), chunks, "Batch finished");
        Ok(counts)
    }
}

fn materialize<R: DeserializeOwned>(sql: &str, row: RowMap) -> DataResult<R> {
    serde_json::from_value(JsonValue::Object(row)).map_err(|e| DataError::mapping(sql, e.to_string()))
}
