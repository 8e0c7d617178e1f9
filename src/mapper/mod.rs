//! Query backend B: statements declared in XML mapping descriptors.
//!
//! A master descriptor (`mybatis-config.xml`) carries global settings; every
//! file matching the mapper locations declares statements under a
//! namespace. All of it is loaded once by `SqlSessionFactory::build`.
//!
//! ```ignore
//! let factory = SqlSessionFactory::build(provider, &resolver, FactoryOptions::default())?;
//! let users = SessionUserMapper::new(&factory);
//! let user = users.find_user_by_user_id("u-100").await?;
//! ```

pub mod config;
pub mod descriptor;
pub mod naming;
pub mod resources;
pub mod session;
pub mod user;
mod xml;

pub use config::MapperConfiguration;
pub use descriptor::{MappedStatement, MapperDescriptor, StatementKind};
pub use resources::{Resource, ResourceResolver};
pub use session::{FactoryOptions, MapperParams, SqlSession, SqlSessionFactory};
pub use user::{SessionUserMapper, UserMapper};
