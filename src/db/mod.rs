//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management
//! - Transaction coordination
//! - Transaction-aware connection provisioning
//! - Statement execution and row decoding
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod executor;
pub mod params;
pub mod pool;
pub mod provider;
pub mod transaction;
pub mod types;

pub use pool::{DataSource, DbConnection, DbPool, PoolStatus, PooledConnection};
pub use provider::{ConnectionProvider, Lease};
pub use transaction::{
    DbTransaction, TransactionContext, TransactionCoordinator, TransactionMetadata,
};
