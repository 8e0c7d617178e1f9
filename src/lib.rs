//! Platform datasource library
//!
//! One pooled datasource shared by two query backends: a guarded, fluent SQL
//! builder (`dsl`) and a mapper driven by XML statement descriptors
//! (`mapper`). Both run on the same transaction coordinator.

pub mod config;
pub mod db;
pub mod dsl;
pub mod entity;
pub mod error;
pub mod mapper;
pub mod models;
pub mod naming;
pub mod platform;

pub use config::{Config, DataSourceProperties};
pub use error::{DataError, DataResult};
pub use platform::Platform;
