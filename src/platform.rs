//! Wiring of the shared pool, the transaction coordinator and both query
//! backends.
//!
//! Construction order is fixed: pool, coordinator, query builder, session
//! factory. Any failure closes what was already opened and is returned to
//! the caller; there is no partially built platform.

use crate::config::{Config, DataSourceProperties};
use crate::db::{ConnectionProvider, DataSource, PoolStatus, TransactionCoordinator};
use crate::dsl::{DslContext, QuerySettings};
use crate::error::DataResult;
use crate::mapper::{FactoryOptions, ResourceResolver, SessionUserMapper, SqlSessionFactory};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Platform {
    data_source: DataSource,
    coordinator: TransactionCoordinator,
    dsl: DslContext,
    sessions: SqlSessionFactory,
}

/// Snapshot for `check` output and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformStatus {
    pub pool_name: String,
    pub database: String,
    pub pool: PoolStatus,
    pub active_transactions: usize,
    pub mapped_statements: usize,
}

impl Platform {
    /// Build everything from command line configuration.
    pub async fn build(config: &Config) -> DataResult<Self> {
        let props = config.datasource_properties()?;
        let resolver = ResourceResolver::new(config.resource_roots.iter().cloned());
        let settings = QuerySettings::new()
            .with_batch_size(config.batch_size)
            .with_query_timeout(config.query_timeout());
        let options = FactoryOptions {
            config_location: config.config_location.clone(),
            mapper_locations: config.mapper_locations.clone(),
            fallback_timeout: config.query_timeout(),
            ..FactoryOptions::default()
        };
        Self::from_parts(&props, &resolver, settings, options).await
    }

    /// Build from explicit parts. The mapper always converts snake_case
    /// column labels to camelCase, whatever the master descriptor says.
    pub async fn from_parts(
        props: &DataSourceProperties,
        resolver: &ResourceResolver,
        settings: QuerySettings,
        options: FactoryOptions,
    ) -> DataResult<Self> {
        let data_source = DataSource::connect(props).await?;

        let wired = Self::wire(data_source.clone(), resolver, settings, options);
        match wired {
            Ok(platform) => {
                info!(
                    pool_name = %platform.data_source.name(),
                    db_type = %platform.data_source.db_type(),
                    "Platform datasource ready"
                );
                Ok(platform)
            }
            Err(e) => {
                warn!(error = %e, "Platform construction failed, closing pool");
                data_source.close().await;
                Err(e)
            }
        }
    }

    fn wire(
        data_source: DataSource,
        resolver: &ResourceResolver,
        settings: QuerySettings,
        options: FactoryOptions,
    ) -> DataResult<Self> {
        let coordinator = TransactionCoordinator::new(data_source.clone());
        let provider = ConnectionProvider::new(data_source.clone());
        let dsl = DslContext::new(provider.clone(), settings)?;
        let sessions = SqlSessionFactory::build(
            provider,
            resolver,
            FactoryOptions {
                map_underscore_to_camel_case: Some(true),
                ..options
            },
        )?;

        Ok(Self {
            data_source,
            coordinator,
            dsl,
            sessions,
        })
    }

    pub fn data_source(&self) -> &DataSource {
        &self.data_source
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn dsl(&self) -> &DslContext {
        &self.dsl
    }

    pub fn sessions(&self) -> &SqlSessionFactory {
        &self.sessions
    }

    pub fn user_mapper(&self) -> SessionUserMapper {
        SessionUserMapper::new(&self.sessions)
    }

    pub async fn status(&self) -> PlatformStatus {
        PlatformStatus {
            pool_name: self.data_source.name().to_string(),
            database: self.data_source.db_type().to_string(),
            pool: self.data_source.status(),
            active_transactions: self.coordinator.active_count().await,
            mapped_statements: self.sessions.statement_ids().len(),
        }
    }

    pub async fn close(&self) {
        self.data_source.close().await;
    }
}
