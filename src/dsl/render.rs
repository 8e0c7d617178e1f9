//! SQL rendering per dialect.
//!
//! Each statement renders twice from the same bound parameters: a compact
//! single-line form that is executed, and a multi-line form for logs.

use crate::dsl::condition::Condition;
use crate::dsl::query::{DeleteQuery, InsertQuery, Query, QueryKind, SelectQuery, UpdateQuery};
use crate::dsl::table::Table;
use crate::error::{DataError, DataResult};
use crate::models::{DatabaseType, SqlParam};

/// A statement ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub kind: QueryKind,
    pub sql: String,
    pub formatted: String,
    pub params: Vec<SqlParam>,
    /// Whether the statement carries a WHERE clause.
    pub has_where: bool,
}

struct Clause {
    compact: String,
    formatted: String,
}

impl Clause {
    fn plain(text: String) -> Self {
        Self {
            formatted: text.clone(),
            compact: text,
        }
    }
}

pub struct Renderer {
    db_type: DatabaseType,
    render_schema: bool,
    params: Vec<SqlParam>,
}

impl Renderer {
    pub fn new(db_type: DatabaseType, render_schema: bool) -> Self {
        Self {
            db_type,
            render_schema,
            params: Vec::new(),
        }
    }

    pub fn render(mut self, query: &Query) -> DataResult<RenderedQuery> {
        let (clauses, has_where) = match query {
            Query::Select(q) => self.select(q)?,
            Query::Insert(q) => (self.insert(q)?, false),
            Query::Update(q) => self.update(q)?,
            Query::Delete(q) => self.delete(q)?,
        };

        let sql = clauses
            .iter()
            .map(|c| c.compact.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let formatted = clauses
            .iter()
            .map(|c| c.formatted.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(RenderedQuery {
            kind: query.kind(),
            sql,
            formatted,
            params: self.params,
            has_where,
        })
    }

    /// `SELECT COUNT(*)` over the given select.
    pub fn render_count(self, query: &SelectQuery) -> DataResult<RenderedQuery> {
        let db_type = self.db_type;
        let inner = self.render(&Query::Select(query.clone()))?;
        let alias = db_type.quote_identifier("q");
        let count = db_type.quote_identifier("count");
        Ok(RenderedQuery {
            sql: format!("SELECT COUNT(*) AS {} FROM ({}) AS {}", count, inner.sql, alias),
            formatted: format!(
                "SELECT COUNT(*) AS {}\nFROM (\n{}\n) AS {}",
                count, inner.formatted, alias
            ),
            ..inner
        })
    }

    fn select(&mut self, q: &SelectQuery) -> DataResult<(Vec<Clause>, bool)> {
        let columns = if q.columns.is_empty() {
            "*".to_string()
        } else {
            q.columns
                .iter()
                .map(|c| self.column(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut clauses = vec![
            Clause::plain(format!("SELECT {}", columns)),
            Clause::plain(format!("FROM {}", self.table(&q.table))),
        ];

        let where_clause = self.where_clause(&q.condition)?;
        let has_where = where_clause.is_some();
        clauses.extend(where_clause);

        if !q.order_by.is_empty() {
            let order = q
                .order_by
                .iter()
                .map(|o| {
                    let dir = if o.descending { "DESC" } else { "ASC" };
                    format!("{} {}", self.column(&o.column), dir)
                })
                .collect::<Vec<_>>()
                .join(", ");
            clauses.push(Clause::plain(format!("ORDER BY {}", order)));
        }

        match (q.limit, q.offset) {
            (Some(limit), Some(offset)) => {
                clauses.push(Clause::plain(format!("LIMIT {} OFFSET {}", limit, offset)))
            }
            (Some(limit), None) => clauses.push(Clause::plain(format!("LIMIT {}", limit))),
            (None, Some(offset)) => {
                // MySQL and SQLite need a LIMIT before OFFSET
                let no_limit = match self.db_type {
                    DatabaseType::PostgreSQL => "ALL".to_string(),
                    DatabaseType::MySQL => u64::MAX.to_string(),
                    DatabaseType::SQLite => "-1".to_string(),
                };
                clauses.push(Clause::plain(format!("LIMIT {} OFFSET {}", no_limit, offset)))
            }
            (None, None) => {}
        }

        Ok((clauses, has_where))
    }

    fn insert(&mut self, q: &InsertQuery) -> DataResult<Vec<Clause>> {
        if q.columns.is_empty() {
            return Err(DataError::invalid_input(format!(
                "INSERT INTO {} has no columns",
                q.table
            )));
        }
        if q.rows.is_empty() {
            return Err(DataError::invalid_input(format!(
                "INSERT INTO {} has no rows",
                q.table
            )));
        }

        let columns = q
            .columns
            .iter()
            .map(|c| self.column(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut rows = Vec::with_capacity(q.rows.len());
        for (idx, row) in q.rows.iter().enumerate() {
            if row.len() != q.columns.len() {
                return Err(DataError::invalid_input(format!(
                    "INSERT INTO {} row {} has {} values for {} columns",
                    q.table,
                    idx,
                    row.len(),
                    q.columns.len()
                )));
            }
            let values = row
                .iter()
                .map(|v| self.bind(v.clone()))
                .collect::<Vec<_>>()
                .join(", ");
            rows.push(format!("({})", values));
        }

        Ok(vec![
            Clause::plain(format!("INSERT INTO {} ({})", self.table(&q.table), columns)),
            Clause {
                compact: format!("VALUES {}", rows.join(", ")),
                formatted: format!("VALUES\n  {}", rows.join(",\n  ")),
            },
        ])
    }

    fn update(&mut self, q: &UpdateQuery) -> DataResult<(Vec<Clause>, bool)> {
        if q.assignments.is_empty() {
            return Err(DataError::invalid_input(format!(
                "UPDATE {} has no SET clause",
                q.table
            )));
        }

        let assignments = q
            .assignments
            .iter()
            .map(|(column, value)| format!("{} = {}", self.column(column), self.bind(value.clone())))
            .collect::<Vec<_>>();

        let mut clauses = vec![
            Clause::plain(format!("UPDATE {}", self.table(&q.table))),
            Clause {
                compact: format!("SET {}", assignments.join(", ")),
                formatted: format!("SET {}", assignments.join(",\n    ")),
            },
        ];
        let where_clause = self.where_clause(&q.condition)?;
        let has_where = where_clause.is_some();
        clauses.extend(where_clause);
        Ok((clauses, has_where))
    }

    fn delete(&mut self, q: &DeleteQuery) -> DataResult<(Vec<Clause>, bool)> {
        let mut clauses = vec![Clause::plain(format!("DELETE FROM {}", self.table(&q.table)))];
        let where_clause = self.where_clause(&q.condition)?;
        let has_where = where_clause.is_some();
        clauses.extend(where_clause);
        Ok((clauses, has_where))
    }

    fn where_clause(&mut self, condition: &Condition) -> DataResult<Option<Clause>> {
        if !condition.is_predicate() {
            return Ok(None);
        }

        // Top-level conjunctions go one per line in the formatted form.
        let parts = match condition {
            Condition::And(parts) if !parts.is_empty() => parts
                .iter()
                .filter(|p| p.is_predicate())
                .map(|p| self.nested(p))
                .collect::<DataResult<Vec<_>>>()?,
            other => vec![self.condition(other)?],
        };

        Ok(Some(Clause {
            compact: format!("WHERE {}", parts.join(" AND ")),
            formatted: format!("WHERE {}", parts.join("\n  AND ")),
        }))
    }

    fn nested(&mut self, condition: &Condition) -> DataResult<String> {
        let sql = self.condition(condition)?;
        Ok(match condition {
            Condition::And(_) | Condition::Or(_) | Condition::Raw { .. } => format!("({})", sql),
            _ => sql,
        })
    }

    fn condition(&mut self, condition: &Condition) -> DataResult<String> {
        Ok(match condition {
            Condition::None | Condition::True => "1 = 1".to_string(),
            Condition::Compare { column, op, value } => {
                let column = self.column(column);
                format!("{} {} {}", column, op.as_sql(), self.bind(value.clone()))
            }
            Condition::IsNull(column) => format!("{} IS NULL", self.column(column)),
            Condition::IsNotNull(column) => format!("{} IS NOT NULL", self.column(column)),
            Condition::In { column, values } => {
                if values.is_empty() {
                    "1 = 0".to_string()
                } else {
                    let column = self.column(column);
                    let placeholders = values
                        .iter()
                        .map(|v| self.bind(v.clone()))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("{} IN ({})", column, placeholders)
                }
            }
            Condition::And(parts) => self.junction(parts, " AND ")?,
            Condition::Or(parts) => self.junction(parts, " OR ")?,
            Condition::Not(inner) => format!("NOT ({})", self.condition(inner)?),
            Condition::Raw { sql, params } => self.raw(sql, params)?,
        })
    }

    fn junction(&mut self, parts: &[Condition], separator: &str) -> DataResult<String> {
        let rendered = parts
            .iter()
            .filter(|p| p.is_predicate())
            .map(|p| self.nested(p))
            .collect::<DataResult<Vec<_>>>()?;
        if rendered.is_empty() {
            return Err(DataError::internal("junction without a predicate reached the renderer"));
        }
        Ok(rendered.join(separator))
    }

    /// Rewrite `?` placeholders outside string literals for the dialect.
    fn raw(&mut self, sql: &str, params: &[SqlParam]) -> DataResult<String> {
        let mut out = String::with_capacity(sql.len());
        let mut in_literal = false;
        let mut next = 0;

        for c in sql.chars() {
            match c {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(c);
                }
                '?' if !in_literal => {
                    let param = params.get(next).ok_or_else(|| {
                        DataError::invalid_input(format!(
                            "Raw condition '{}' has more placeholders than parameters",
                            sql
                        ))
                    })?;
                    out.push_str(&self.bind(param.clone()));
                    next += 1;
                }
                _ => out.push(c),
            }
        }

        if next != params.len() {
            return Err(DataError::invalid_input(format!(
                "Raw condition '{}' has {} placeholders but {} parameters",
                sql,
                next,
                params.len()
            )));
        }
        Ok(out)
    }

    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        self.db_type.placeholder(self.params.len())
    }

    fn table(&self, table: &Table) -> String {
        match table.schema() {
            Some(schema) if self.render_schema => format!(
                "{}.{}",
                self.db_type.quote_identifier(schema),
                self.db_type.quote_identifier(table.name())
            ),
            _ => self.db_type.quote_identifier(table.name()),
        }
    }

    /// Quote a column name; `t.col` is quoted per segment and expressions
    /// such as `COUNT(*)` are passed through.
    fn column(&self, column: &str) -> String {
        if column == "*" || column.contains(['(', ' ', '*']) {
            return column.to_string();
        }
        column
            .split('.')
            .map(|part| self.db_type.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }
}
