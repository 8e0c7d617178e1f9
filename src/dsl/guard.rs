//! Write guard for UPDATE and DELETE statements without a WHERE clause.
//!
//! Built statements are checked from their rendered form. Raw SQL is parsed
//! with sqlparser in the datasource's dialect and every statement in it is
//! checked, so formatting tricks or comments cannot hide a missing WHERE.

use crate::dsl::settings::{QuerySettings, WithoutWhere};
use crate::error::{DataError, DataResult};
use crate::models::DatabaseType;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use tracing::{debug, info, warn};

/// Statement kinds the guard applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedOperation {
    Delete,
    Update,
}

impl GuardedOperation {
    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Update => "UPDATE",
        }
    }

    fn policy(&self, settings: &QuerySettings) -> WithoutWhere {
        match self {
            Self::Delete => settings.delete_without_where(),
            Self::Update => settings.update_without_where(),
        }
    }
}

/// Apply the configured policy to one statement.
pub fn check_statement(
    operation: GuardedOperation,
    has_where: bool,
    statement: &str,
    settings: &QuerySettings,
) -> DataResult<()> {
    if has_where {
        return Ok(());
    }

    let op = operation.operation_name();
    match operation.policy(settings) {
        WithoutWhere::Throw => return Err(DataError::guard_violation(op, statement)),
        WithoutWhere::LogWarn => warn!(operation = op, sql = %statement, "Statement without WHERE"),
        WithoutWhere::LogInfo => info!(operation = op, sql = %statement, "Statement without WHERE"),
        WithoutWhere::LogDebug => {
            debug!(operation = op, sql = %statement, "Statement without WHERE")
        }
        WithoutWhere::Ignore => {}
    }
    Ok(())
}

fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Find every UPDATE/DELETE without WHERE in a SQL string.
///
/// Returns `Err` if parsing fails (no fallback to string-based detection).
pub fn find_unconditional_writes(
    sql: &str,
    db_type: DatabaseType,
) -> DataResult<Vec<GuardedOperation>> {
    let dialect = get_dialect(db_type);

    let statements = Parser::parse_sql(dialect.as_ref(), sql)
        .map_err(|e| DataError::invalid_input(format!("Failed to parse SQL statement: {}", e)))?;

    if statements.is_empty() {
        return Err(DataError::invalid_input("Empty SQL statement"));
    }

    Ok(statements.iter().filter_map(unconditional_write).collect())
}

fn unconditional_write(stmt: &Statement) -> Option<GuardedOperation> {
    match stmt {
        Statement::Delete(delete) if delete.selection.is_none() => Some(GuardedOperation::Delete),
        Statement::Update(update) if update.selection.is_none() => Some(GuardedOperation::Update),
        _ => None,
    }
}

/// Parse raw SQL and apply the policy to each UPDATE/DELETE in it.
pub fn check_raw_sql(sql: &str, db_type: DatabaseType, settings: &QuerySettings) -> DataResult<()> {
    for operation in find_unconditional_writes(sql, db_type)? {
        check_statement(operation, false, sql, settings)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_without_where_detected() {
        let found = find_unconditional_writes("DELETE FROM users", DatabaseType::MySQL).unwrap();
        assert_eq!(found, vec![GuardedOperation::Delete]);
    }

    #[test]
    fn test_update_without_where_detected() {
        let found =
            find_unconditional_writes("UPDATE users SET active = 0", DatabaseType::PostgreSQL)
                .unwrap();
        assert_eq!(found, vec![GuardedOperation::Update]);
    }

    #[test]
    fn test_writes_with_where_pass() {
        let found = find_unconditional_writes(
            "DELETE FROM users WHERE id = 1; UPDATE users SET a = 1 WHERE id = 2",
            DatabaseType::SQLite,
        )
        .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_hidden_behind_comment_and_second_statement() {
        let found = find_unconditional_writes(
            "SELECT 1; /* WHERE id = 1 */ DELETE FROM users -- WHERE id = 1",
            DatabaseType::SQLite,
        )
        .unwrap();
        assert_eq!(found, vec![GuardedOperation::Delete]);
    }

    #[test]
    fn test_unparsable_sql_rejected() {
        let err = find_unconditional_writes("DELEET FROM", DatabaseType::MySQL).unwrap_err();
        assert!(matches!(err, DataError::InvalidInput { .. }));
    }

    #[test]
    fn test_throw_policy_rejects() {
        let settings = QuerySettings::default();
        let err = check_raw_sql("DELETE FROM users", DatabaseType::MySQL, &settings).unwrap_err();
        assert!(matches!(err, DataError::GuardViolation { .. }));
        assert!(err.to_string().contains("DELETE FROM users"));
    }

    #[test]
    fn test_log_policies_allow() {
        for policy in [
            WithoutWhere::LogWarn,
            WithoutWhere::LogInfo,
            WithoutWhere::LogDebug,
            WithoutWhere::Ignore,
        ] {
            let settings = QuerySettings::new()
                .with_delete_without_where(policy)
                .with_update_without_where(policy);
            assert!(check_statement(GuardedOperation::Delete, false, "DELETE FROM t", &settings).is_ok());
            assert!(check_statement(GuardedOperation::Update, false, "UPDATE t SET a = 1", &settings).is_ok());
        }
    }

    #[test]
    fn test_policies_are_independent() {
        let settings = QuerySettings::new().with_update_without_where(WithoutWhere::Ignore);
        assert!(check_statement(GuardedOperation::Update, false, "UPDATE t SET a = 1", &settings).is_ok());
        assert!(check_statement(GuardedOperation::Delete, false, "DELETE FROM t", &settings).is_err());
    }
}
