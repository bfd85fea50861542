//! Expiry sweep tests

mod fixtures;

use fixtures::*;
use service_dispatch::sweeper::SweepReport;
use service_dispatch::types::*;
use std::sync::Arc;

#[tokio::test]
async fn test_stale_request_without_rejections_expires() {
    let market = TestMarketplace::new(1);
    let id = market.book().await;
    market.advance_hours(30);

    let report = market
        .engine
        .run_expiry_sweep(market.engine.now())
        .await
        .unwrap();

    assert_eq!(
        report,
        SweepReport {
            scanned: 1,
            expired: 1,
            ..SweepReport::default()
        }
    );
    assert_eq!(market.status(id).await, RequestStatus::Expired);

    let request = market.engine.get(id).await.unwrap();
    assert_eq!(request.professional, None);

    match &market.publisher.events()[0] {
        LifecycleEvent::RequestResolved(event) => {
            assert_eq!(event.status, RequestStatus::Expired);
            assert_eq!(event.resolved_by, ResolvedBy::Sweep);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_stale_request_rejected_by_everyone_is_rejected() {
    let market = TestMarketplace::new(2);
    let id = market.book().await;
    market.engine.reject(id, "pro_1").await.unwrap();

    // pro_2 loses approval, so the only remaining eligible professional declined
    market.directory.set_approval("pro_2", false).unwrap();
    market.advance_hours(25);

    let report = market
        .engine
        .run_expiry_sweep(market.engine.now())
        .await
        .unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(market.status(id).await, RequestStatus::Rejected);
}

#[tokio::test]
async fn test_request_with_no_eligible_professionals_is_rejected() {
    let market = TestMarketplace::new(0);
    let id = market.book().await;
    market.advance_hours(25);

    let report = market
        .engine
        .run_expiry_sweep(market.engine.now())
        .await
        .unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.resolved_count(), 1);
    assert_eq!(market.status(id).await, RequestStatus::Rejected);
}

#[tokio::test]
async fn test_fresh_and_resolved_requests_are_left_alone() {
    let market = TestMarketplace::new(1);

    let accepted = market.book().await;
    market.engine.accept(accepted, "pro_1").await.unwrap();
    market.advance_hours(30);
    let fresh = market.book().await;

    let report = market
        .engine
        .run_expiry_sweep(market.engine.now())
        .await
        .unwrap();

    assert_eq!(report, SweepReport::default());
    assert_eq!(market.status(accepted).await, RequestStatus::Accepted);
    assert_eq!(market.status(fresh).await, RequestStatus::Pending);
}

#[tokio::test]
async fn test_horizon_boundary() {
    let market = TestMarketplace::new(1);
    let id = market.book().await;

    // Exactly at the horizon the request is not yet stale
    market.advance_hours(24);
    let report = market
        .engine
        .run_expiry_sweep(market.engine.now())
        .await
        .unwrap();
    assert_eq!(report.scanned, 0);

    market.clock.advance(chrono::Duration::seconds(1));
    let report = market
        .engine
        .run_expiry_sweep(market.engine.now())
        .await
        .unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(market.status(id).await, RequestStatus::Expired);
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let market = TestMarketplace::new(1);
    market.book().await;
    market.book().await;
    market.advance_hours(48);
    let now = market.engine.now();

    let first = market.engine.run_expiry_sweep(now).await.unwrap();
    assert_eq!(first.expired, 2);

    let second = market.engine.run_expiry_sweep(now).await.unwrap();
    assert_eq!(second, SweepReport::default());
    assert_eq!(market.publisher.events().len(), 2);
}

#[tokio::test]
async fn test_sweep_retries_store_failures() {
    let store = Arc::new(FlakyRequestStore::new());
    let market = TestMarketplace::with_store(1, store.clone());
    let id = market.book().await;
    market.advance_hours(30);

    // Two failures fit inside the default three retries
    store.fail_next(2);
    let report = market
        .engine
        .run_expiry_sweep(market.engine.now())
        .await
        .unwrap();

    assert_eq!(report.expired, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(store.transition_calls(), 3);
    assert_eq!(market.status(id).await, RequestStatus::Expired);
}

#[tokio::test]
async fn test_sweep_continues_past_failing_row() {
    let store = Arc::new(FlakyRequestStore::new());
    let market = TestMarketplace::with_store(1, store.clone());
    let first = market.book().await;
    market.clock.advance(chrono::Duration::minutes(1));
    let second = market.book().await;
    market.advance_hours(30);

    // The oldest row exhausts its retries; the next one commits
    store.fail_next(4);
    let report = market
        .engine
        .run_expiry_sweep(market.engine.now())
        .await
        .unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.expired, 1);
    assert_eq!(market.status(first).await, RequestStatus::Pending);
    assert_eq!(market.status(second).await, RequestStatus::Expired);

    // The next pass picks the failed row up again
    let report = market
        .engine
        .run_expiry_sweep(market.engine.now())
        .await
        .unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(market.status(first).await, RequestStatus::Expired);
}

#[tokio::test]
async fn test_background_sweeper_runs_until_stopped() {
    let market = TestMarketplace::new(1);
    let id = market.book().await;
    market.advance_hours(30);

    let is_running = Arc::new(tokio::sync::RwLock::new(true));
    let handle = market.engine.expiry_sweeper().start(is_running.clone());

    // The first interval tick fires immediately
    for _ in 0..50 {
        if market.status(id).await == RequestStatus::Expired {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(market.status(id).await, RequestStatus::Expired);

    *is_running.write().await = false;
    handle.abort();
}
