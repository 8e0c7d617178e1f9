//! Query policy settings for the SQL builder.

use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_QUERY_TIMEOUT_SECS};
use crate::error::{DataError, DataResult};
use serde::Serialize;
use std::time::Duration;

/// What to do with an UPDATE or DELETE that has no WHERE clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithoutWhere {
    /// Reject with `GuardViolation` before a connection is borrowed.
    #[default]
    Throw,
    LogWarn,
    LogInfo,
    LogDebug,
    Ignore,
}

/// Settings carried by a `DslContext`. Fixed once the context is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySettings {
    delete_without_where: WithoutWhere,
    update_without_where: WithoutWhere,
    render_schema: bool,
    render_formatted: bool,
    batch_size: usize,
    #[serde(with = "duration_secs")]
    query_timeout: Duration,
}

impl QuerySettings {
    pub fn new() -> Self {
        Self {
            delete_without_where: WithoutWhere::Throw,
            update_without_where: WithoutWhere::Throw,
            render_schema: false,
            render_formatted: true,
            batch_size: DEFAULT_BATCH_SIZE,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    pub fn with_delete_without_where(mut self, policy: WithoutWhere) -> Self {
        self.delete_without_where = policy;
        self
    }

    pub fn with_update_without_where(mut self, policy: WithoutWhere) -> Self {
        self.update_without_where = policy;
        self
    }

    pub fn with_render_schema(mut self, render_schema: bool) -> Self {
        self.render_schema = render_schema;
        self
    }

    pub fn with_render_formatted(mut self, render_formatted: bool) -> Self {
        self.render_formatted = render_formatted;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    pub fn delete_without_where(&self) -> WithoutWhere {
        self.delete_without_where
    }

    pub fn update_without_where(&self) -> WithoutWhere {
        self.update_without_where
    }

    pub fn render_schema(&self) -> bool {
        self.render_schema
    }

    pub fn render_formatted(&self) -> bool {
        self.render_formatted
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub fn validate(&self) -> DataResult<()> {
        if self.batch_size == 0 {
            return Err(DataError::configuration(
                "batch size must be greater than 0",
                "batch-size",
            ));
        }
        if self.query_timeout.is_zero() {
            return Err(DataError::configuration(
                "query timeout must be greater than 0",
                "query-timeout",
            ));
        }
        Ok(())
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }
}
