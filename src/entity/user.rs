//! The `user` table.

use crate::dsl::{Condition, DslContext, Table};
use crate::error::DataResult;
use serde::{Deserialize, Serialize};

pub const USER_TABLE: &str = "user";

pub const ID: &str = "id";
pub const USER_ID: &str = "user_id";
pub const NAME: &str = "name";
pub const EMAIL: &str = "email";
pub const STATUS: &str = "status";

pub const COLUMNS: [&str; 5] = [ID, USER_ID, NAME, EMAIL, STATUS];

pub fn user_table() -> Table {
    Table::new(USER_TABLE)
}

/// Row of `user` as the mapper sees it (camelCase labels).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub status: Option<String>,
}

/// Row of `user` as the query builder sees it (column labels as is).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub status: Option<String>,
}

impl UserRecord {
    pub async fn find_by_user_id(dsl: &DslContext, user_id: &str) -> DataResult<Option<Self>> {
        dsl.select(COLUMNS)
            .from(&user_table())
            .where_(Condition::eq(USER_ID, user_id))
            .fetch_optional_into()
            .await
    }
}

impl From<UserRecord> for UserEntity {
    fn from(r: UserRecord) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            name: r.name,
            email: r.email,
            status: r.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{ClassMode, GeneratorStrategy};
    use serde_json::json;

    fn short_name<T>() -> &'static str {
        let full = std::any::type_name::<T>();
        full.rsplit("::").next().unwrap_or(full)
    }

    #[test]
    fn test_type_names_follow_generator_strategy() {
        let strategy = GeneratorStrategy;
        assert_eq!(short_name::<UserEntity>(), strategy.class_name(USER_TABLE, ClassMode::Pojo));
        assert_eq!(short_name::<UserRecord>(), strategy.class_name(USER_TABLE, ClassMode::Record));
    }

    #[test]
    fn test_entity_uses_camel_case_labels() {
        let entity: UserEntity = serde_json::from_value(json!({
            "id": 1, "userId": "u-1", "name": "Kim", "email": null, "status": "ACTIVE"
        }))
        .unwrap();
        assert_eq!(entity.user_id, "u-1");

        let record: UserRecord = serde_json::from_value(json!({
            "id": 1, "user_id": "u-1", "name": "Kim", "email": null, "status": "ACTIVE"
        }))
        .unwrap();
        assert_eq!(UserEntity::from(record), entity);
    }
}
