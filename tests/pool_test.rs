//! Integration tests for pool exhaustion with a single connection.

mod common;

use common::{insert_user, setup, setup_with_timeout};
use platform_datasource::dsl::{Condition, QuerySettings};
use platform_datasource::entity::user::user_table;
use platform_datasource::mapper::UserMapper;
use platform_datasource::DataError;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_task_waits_for_transaction() {
    let env = setup(1, QuerySettings::new()).await;
    let platform = env.platform.clone();
    insert_user(&platform, 1, "u-1", "Kim").await;

    // Task A holds the only connection.
    let tx = platform.coordinator().begin().await.unwrap();

    // Task B needs a connection too.
    let waiting = {
        let platform = platform.clone();
        tokio::spawn(async move {
            platform
                .dsl()
                .fetch_count(&user_table(), Condition::none())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!waiting.is_finished(), "B must wait while A holds the connection");

    platform.coordinator().commit(&tx).await.unwrap();

    let count = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_waiting_task_gets_pool_exhausted_after_timeout() {
    let env = setup_with_timeout(1, QuerySettings::new(), Duration::from_millis(300)).await;
    let platform = env.platform.clone();

    let tx = platform.coordinator().begin().await.unwrap();

    let waiting = {
        let platform = platform.clone();
        tokio::spawn(async move { platform.user_mapper().find_user_by_user_id("u-1").await })
    };
    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, DataError::PoolExhausted { .. }), "{}", err);
    assert!(err.is_retryable());

    // The transaction is unaffected and the pool recovers once it ends.
    platform.coordinator().rollback(&tx).await.unwrap();
    assert!(platform
        .user_mapper()
        .find_user_by_user_id("u-1")
        .await
        .unwrap()
        .is_none());
}
