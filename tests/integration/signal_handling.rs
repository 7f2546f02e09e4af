//! Integration tests for Ctrl+C handling

use std::time::Duration;

use utility_sync::shutdown::ShutdownCoordinator;

#[tokio::test]
async fn waiters_wake_on_request() {
    let shutdown = ShutdownCoordinator::shared();
    let waiters: Vec<_> = (0..5)
        .map(|_| {
            let handle = shutdown.clone();
            tokio::spawn(async move { handle.wait_for_shutdown().await })
        })
        .collect();

    // Let the tasks park on the notification first
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.request_shutdown();

    for waiter in waiters {
        let woke = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(woke.is_ok(), "a waiter missed the shutdown request");
    }
}

#[tokio::test]
async fn request_before_wait_is_not_lost() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    assert!(shutdown.is_shutdown_requested());

    let handle = shutdown.clone();
    let waiter = tokio::spawn(async move { handle.wait_for_shutdown().await });
    let woke = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(woke.is_ok(), "wait_for_shutdown() hung after an earlier request");
}

#[tokio::test]
async fn repeated_requests_are_harmless() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    shutdown.request_shutdown();

    let start = tokio::time::Instant::now();
    shutdown.wait_for_shutdown().await;
    assert!(start.elapsed() < Duration::from_millis(50));
}
