//! Error types for the platform datasource.
//!
//! Every failure surfaces synchronously to the caller of the operation that
//! triggered it. Nothing in this crate retries; `is_retryable` only tells the
//! caller which failures are worth retrying at a higher level.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Configuration error: {message} (resource: {resource})")]
    Configuration { message: String, resource: String },

    #[error("Guard violation: {operation} without WHERE rejected. Statement: {statement}")]
    GuardViolation { operation: String, statement: String },

    #[error("Query timeout: statement exceeded {timeout_ms}ms and was abandoned. Statement: {statement}")]
    QueryTimeout { statement: String, timeout_ms: u64 },

    #[error("Pool exhausted: {message}")]
    PoolExhausted { message: String },

    #[error("Invalid transaction state: {message} (transaction: {transaction_id})")]
    InvalidTransactionState {
        message: String,
        transaction_id: String,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Mapping error in '{statement}': {message}")]
    Mapping { statement: String, message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DataError {
    /// Create a configuration error naming the offending resource or key.
    pub fn configuration(message: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            resource: resource.into(),
        }
    }

    /// Create a guard violation for an unconditional write.
    pub fn guard_violation(operation: impl Into<String>, statement: impl Into<String>) -> Self {
        Self::GuardViolation {
            operation: operation.into(),
            statement: statement.into(),
        }
    }

    pub fn query_timeout(statement: impl Into<String>, timeout: Duration) -> Self {
        Self::QueryTimeout {
            statement: statement.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a pool exhaustion error for the configured acquire timeout.
    pub fn pool_exhausted(pool_name: &str, acquire_timeout: Duration) -> Self {
        Self::PoolExhausted {
            message: format!(
                "no connection became available in pool '{}' within {}ms",
                pool_name,
                acquire_timeout.as_millis()
            ),
        }
    }

    pub fn invalid_transaction_state(
        message: impl Into<String>,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self::InvalidTransactionState {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn mapping(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            statement: statement.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if the caller may retry this operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueryTimeout { .. } | Self::PoolExhausted { .. } | Self::Connection { .. }
        )
    }
}

/// Convert sqlx errors to DataError.
impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DataError::configuration(
                msg.to_string(),
                "datasource url",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DataError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DataError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            // Callers that know the pool's name and timeout map this themselves.
            sqlx::Error::PoolTimedOut => DataError::PoolExhausted {
                message: "timed out waiting for a pooled connection".to_string(),
            },
            sqlx::Error::PoolClosed => {
                DataError::connection("Connection pool is closed", "Rebuild the datasource")
            }
            sqlx::Error::Io(io_err) => DataError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DataError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DataError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DataError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DataError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DataError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DataError::internal("Database worker crashed"),
            _ => DataError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for datasource operations.
pub type DataResult<T> = Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_violation_names_statement() {
        let err = DataError::guard_violation("DELETE", "DELETE FROM `user`");
        let msg = err.to_string();
        assert!(msg.contains("DELETE without WHERE"));
        assert!(msg.contains("DELETE FROM `user`"));
    }

    #[test]
    fn test_configuration_error_names_resource() {
        let err = DataError::configuration("resource not found", "classpath:mybatis-config.xml");
        assert!(err.to_string().contains("classpath:mybatis-config.xml"));
    }

    #[test]
    fn test_query_timeout_display() {
        let err = DataError::query_timeout("SELECT 1", Duration::from_secs(60));
        assert!(err.to_string().contains("60000ms"));
        assert!(err.to_string().contains("SELECT 1"));

        let err = DataError::query_timeout("SELECT 1", Duration::from_millis(300));
        assert!(err.to_string().contains("300ms"));
    }

    #[test]
    fn test_pool_exhausted_display() {
        let err = DataError::pool_exhausted("platform", Duration::from_millis(250));
        let msg = err.to_string();
        assert!(msg.contains("'platform'"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DataError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DataError::invalid_input("x").suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DataError::query_timeout("q", Duration::from_secs(1)).is_retryable());
        assert!(DataError::pool_exhausted("p", Duration::from_secs(1)).is_retryable());
        assert!(DataError::connection("err", "sugg").is_retryable());
        assert!(!DataError::guard_violation("UPDATE", "UPDATE t SET a = 1").is_retryable());
        assert!(!DataError::invalid_transaction_state("closed", "tx_1").is_retryable());
        assert!(!DataError::configuration("bad", "key").is_retryable());
    }

    #[test]
    fn test_pool_timed_out_maps_to_pool_exhausted() {
        let err: DataError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DataError::PoolExhausted { .. }));
    }

    #[test]
    fn test_pool_closed_maps_to_connection() {
        let err: DataError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DataError::Connection { .. }));
    }
}
