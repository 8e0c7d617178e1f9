//! Table types for the platform schema, named per `naming::GeneratorStrategy`.

pub mod user;

pub use user::{UserEntity, UserRecord};
