//! User lookups backed by the `UserMapper` descriptor.

use crate::db::TransactionContext;
use crate::entity::UserEntity;
use crate::error::DataResult;
use crate::mapper::session::{SqlSession, SqlSessionFactory};
use std::future::Future;

pub const USER_MAPPER_NAMESPACE: &str = "com.platform.datasource.platform.mapper.user.UserMapper";

pub const FIND_USER_BY_USER_ID: &str =
    "com.platform.datasource.platform.mapper.user.UserMapper.findUserByUserId";

pub trait UserMapper {
    /// Look up a user by business id. An unknown id is `Ok(None)`.
    fn find_user_by_user_id(
        &self,
        user_id: &str,
    ) -> impl Future<Output = DataResult<Option<UserEntity>>> + Send;
}

/// `UserMapper` that dispatches to the mapped statements through a session.
#[derive(Debug, Clone)]
pub struct SessionUserMapper {
    session: SqlSession,
}

impl SessionUserMapper {
    pub fn new(factory: &SqlSessionFactory) -> Self {
        Self {
            session: factory.open_session(),
        }
    }

    /// Same lookups, run on `tx`'s connection.
    pub fn in_transaction(factory: &SqlSessionFactory, tx: &TransactionContext) -> Self {
        Self {
            session: factory.open_session_in(tx),
        }
    }

    pub fn session(&self) -> &SqlSession {
        &self.session
    }
}

impl UserMapper for SessionUserMapper {
    async fn find_user_by_user_id(&self, user_id: &str) -> DataResult<Option<UserEntity>> {
        self.session.select_one(FIND_USER_BY_USER_ID, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_id_is_namespaced() {
        assert_eq!(
            FIND_USER_BY_USER_ID,
            format!("{}.findUserByUserId", USER_MAPPER_NAMESPACE)
        );
    }
}
