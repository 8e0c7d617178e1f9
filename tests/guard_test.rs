//! Integration tests for the write guard on UPDATE and DELETE.
//!
//! Tests verify that:
//! - Unconditional writes are rejected before a connection is borrowed
//! - The same statements run once they carry a predicate
//! - Raw SQL goes through the same rule

mod common;

use common::{insert_user, setup, sqlite_props};
use platform_datasource::db::{ConnectionProvider, DataSource};
use platform_datasource::dsl::{Condition, DslContext, QuerySettings, WithoutWhere};
use platform_datasource::entity::user::{self, user_table};
use platform_datasource::DataError;
use std::time::Duration;

/// A context over a pool that has already been closed: any statement that
/// reaches the pool fails with a connection error.
async fn closed_pool_context(settings: QuerySettings) -> (DslContext, DataSource, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let props = sqlite_props(dir.path(), 1, Duration::from_millis(200));
    let ds = DataSource::connect(&props).await.unwrap();
    ds.close().await;
    let dsl = DslContext::new(ConnectionProvider::new(ds.clone()), settings).unwrap();
    (dsl, ds, dir)
}

#[tokio::test]
async fn test_unconditional_delete_never_touches_pool() {
    let (dsl, ds, _dir) = closed_pool_context(QuerySettings::new()).await;

    let err = dsl.delete_from(&user_table()).execute().await.unwrap_err();
    assert!(matches!(err, DataError::GuardViolation { .. }), "{}", err);
    assert!(err.to_string().contains("DELETE"));

    let err = dsl
        .delete_from(&user_table())
        .where_(Condition::none())
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::GuardViolation { .. }));
    assert_eq!(ds.lease_count(), 0);
}

#[tokio::test]
async fn test_unconditional_update_never_touches_pool() {
    let (dsl, ds, _dir) = closed_pool_context(QuerySettings::new()).await;

    let err = dsl
        .update(&user_table())
        .set(user::STATUS, "LOCKED")
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::GuardViolation { .. }));

    let err = dsl
        .execute_sql("UPDATE user SET status = 'LOCKED'", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::GuardViolation { .. }));
    assert_eq!(ds.lease_count(), 0);
}

#[tokio::test]
async fn test_empty_junction_is_not_a_predicate() {
    let (dsl, ds, _dir) = closed_pool_context(QuerySettings::new()).await;

    // A filter list that came out empty must not turn into WHERE 1 = 1.
    let err = dsl
        .delete_from(&user_table())
        .where_(Condition::And(Vec::new()))
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::GuardViolation { .. }), "{}", err);

    let err = dsl
        .update(&user_table())
        .set(user::STATUS, "LOCKED")
        .where_(Condition::Or(Vec::new()))
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::GuardViolation { .. }), "{}", err);

    let err = dsl
        .delete_from(&user_table())
        .where_(Condition::And(vec![Condition::none(), Condition::none()]))
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::GuardViolation { .. }), "{}", err);

    let err = dsl
        .delete_from(&user_table())
        .where_(!Condition::Or(vec![Condition::And(Vec::new())]))
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::GuardViolation { .. }), "{}", err);
    assert_eq!(ds.lease_count(), 0);
}

#[tokio::test]
async fn test_empty_junction_keeps_rows() {
    let env = setup(2, QuerySettings::new()).await;
    insert_user(&env.platform, 1, "u-1", "Kim").await;
    insert_user(&env.platform, 2, "u-2", "Lee").await;
    let dsl = env.platform.dsl();

    let result = dsl
        .delete_from(&user_table())
        .where_(Condition::And(Vec::new()))
        .execute()
        .await;
    assert!(matches!(result, Err(DataError::GuardViolation { .. })));

    // A junction holding one real predicate still runs.
    let deleted = dsl
        .delete_from(&user_table())
        .where_(Condition::And(vec![
            Condition::none(),
            Condition::eq(user::USER_ID, "u-1"),
        ]))
        .execute()
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(dsl.fetch_count(&user_table(), Condition::none()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_guarded_statement_reaches_pool() {
    let (dsl, _ds, _dir) = closed_pool_context(QuerySettings::new()).await;

    // With a predicate the guard passes and the closed pool answers.
    let err = dsl
        .delete_from(&user_table())
        .where_(Condition::eq(user::USER_ID, "u-1"))
        .execute()
        .await
        .unwrap_err();
    assert!(!matches!(err, DataError::GuardViolation { .. }), "{}", err);
}

#[tokio::test]
async fn test_predicated_writes_execute() {
    let env = setup(2, QuerySettings::new()).await;
    insert_user(&env.platform, 1, "u-1", "Kim").await;
    insert_user(&env.platform, 2, "u-2", "Lee").await;
    let dsl = env.platform.dsl();

    let updated = dsl
        .update(&user_table())
        .set(user::STATUS, "LOCKED")
        .where_(Condition::eq(user::USER_ID, "u-1"))
        .execute()
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let deleted = dsl
        .delete_from(&user_table())
        .where_(Condition::eq(user::STATUS, "LOCKED"))
        .execute()
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    // An always-true predicate is still a predicate.
    let deleted = dsl
        .delete_from(&user_table())
        .where_(Condition::always_true())
        .execute()
        .await
        .unwrap();
    assert_eq!(deleted, 1);
}

#[tokio::test]
async fn test_relaxed_policy_allows_unconditional_update() {
    let settings = QuerySettings::new().with_update_without_where(WithoutWhere::LogWarn);
    let env = setup(2, settings).await;
    insert_user(&env.platform, 1, "u-1", "Kim").await;
    insert_user(&env.platform, 2, "u-2", "Lee").await;
    let dsl = env.platform.dsl();

    let updated = dsl
        .update(&user_table())
        .set(user::STATUS, "LOCKED")
        .execute()
        .await
        .unwrap();
    assert_eq!(updated, 2);

    // DELETE keeps its own policy.
    let err = dsl.delete_from(&user_table()).execute().await.unwrap_err();
    assert!(matches!(err, DataError::GuardViolation { .. }));
}
