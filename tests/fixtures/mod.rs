//! Test fixtures shared by the integration test crates

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use service_dispatch::amqp::RecordingEventPublisher;
use service_dispatch::clock::ManualClock;
use service_dispatch::config::EngineSettings;
use service_dispatch::error::{EngineError, EngineResult};
use service_dispatch::lifecycle::RequestEngine;
use service_dispatch::matching::{InMemoryRejectionStore, RejectionStore};
use service_dispatch::store::{
    InMemoryDirectory, InMemoryRequestStore, RequestChange, RequestFilter, RequestStore,
};
use service_dispatch::types::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub const SERVICE_ID: &str = "svc_plumbing";
pub const CUSTOMER_ID: &str = "cust_1";
pub const ADDRESS_ID: &str = "addr_1";
pub const POSTAL_CODE: &str = "560001";
pub const BASE_PRICE: f64 = 100.0;

/// Professional ids `pro_1..=pro_n`
pub fn professional_ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("pro_{}", i)).collect()
}

pub fn professional(id: &str, postal_code: &str) -> Professional {
    Professional {
        id: id.to_string(),
        category: "plumbing".to_string(),
        postal_code: postal_code.to_string(),
        is_approved: true,
        rating: RatingSummary::default(),
    }
}

/// Directory with one plumbing service, one address and `n` eligible professionals
pub fn seeded_directory(n: usize) -> Arc<InMemoryDirectory> {
    let directory = InMemoryDirectory::new();
    directory.add_customer(CUSTOMER_ID).unwrap();
    directory.add_customer("cust_2").unwrap();
    directory
        .add_service(Service {
            id: SERVICE_ID.to_string(),
            name: "Pipe repair".to_string(),
            category: "plumbing".to_string(),
            base_price: BASE_PRICE,
            rating: RatingSummary::default(),
        })
        .unwrap();
    directory
        .add_address(Address {
            id: ADDRESS_ID.to_string(),
            postal_code: POSTAL_CODE.to_string(),
        })
        .unwrap();
    for id in professional_ids(n) {
        directory
            .upsert_professional(professional(&id, POSTAL_CODE))
            .unwrap();
    }
    Arc::new(directory)
}

/// Fast settings so retry paths do not slow the suite down
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        sweep_retry_delay_ms: 1,
        store_timeout_ms: 500,
        ..EngineSettings::default()
    }
}

/// A fully wired engine over in-memory stores
pub struct TestMarketplace {
    pub engine: RequestEngine,
    pub requests: Arc<dyn RequestStore>,
    pub directory: Arc<InMemoryDirectory>,
    pub publisher: Arc<RecordingEventPublisher>,
    pub clock: Arc<ManualClock>,
}

impl TestMarketplace {
    pub fn new(professionals: usize) -> Self {
        Self::with_store(professionals, Arc::new(InMemoryRequestStore::new()))
    }

    pub fn with_store(professionals: usize, requests: Arc<dyn RequestStore>) -> Self {
        Self::with_stores(
            professionals,
            requests,
            Arc::new(InMemoryRejectionStore::new()),
        )
    }

    pub fn with_rejections(professionals: usize, rejections: Arc<dyn RejectionStore>) -> Self {
        Self::with_stores(
            professionals,
            Arc::new(InMemoryRequestStore::new()),
            rejections,
        )
    }

    pub fn with_stores(
        professionals: usize,
        requests: Arc<dyn RequestStore>,
        rejections: Arc<dyn RejectionStore>,
    ) -> Self {
        let directory = seeded_directory(professionals);
        let publisher = Arc::new(RecordingEventPublisher::new());
        let clock = Arc::new(ManualClock::new(start_time()));

        let engine = RequestEngine::new(
            requests.clone(),
            rejections,
            directory.clone(),
            publisher.clone(),
        )
        .with_clock(clock.clone())
        .with_config(test_settings());

        Self {
            engine,
            requests,
            directory,
            publisher,
            clock,
        }
    }

    /// Book a request at the current clock time
    pub async fn book(&self) -> RequestId {
        self.book_at(self.engine.now()).await
    }

    pub async fn book_at(&self, requested_at: DateTime<Utc>) -> RequestId {
        self.engine
            .create_pending(SERVICE_ID, CUSTOMER_ID, ADDRESS_ID, requested_at)
            .await
            .unwrap()
    }

    pub async fn status(&self, request_id: RequestId) -> RequestStatus {
        self.engine.get(request_id).await.unwrap().status
    }

    pub fn advance_hours(&self, hours: i64) {
        self.clock.advance(Duration::hours(hours));
    }
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-01T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Request store that fails a configurable number of transitions
///
/// Reads always succeed, so the engine gets far enough to attempt a commit.
#[derive(Default)]
pub struct FlakyRequestStore {
    inner: InMemoryRequestStore,
    failures_left: AtomicUsize,
    transition_calls: AtomicUsize,
}

impl FlakyRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` transition calls with a storage error
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn transition_calls(&self) -> usize {
        self.transition_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestStore for FlakyRequestStore {
    async fn insert(&self, request: ServiceRequest) -> EngineResult<()> {
        self.inner.insert(request).await
    }

    async fn get(&self, request_id: RequestId) -> EngineResult<Option<ServiceRequest>> {
        self.inner.get(request_id).await
    }

    async fn transition(
        &self,
        request_id: RequestId,
        expected: RequestStatus,
        change: RequestChange,
    ) -> EngineResult<ServiceRequest> {
        self.transition_calls.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(EngineError::storage("injected connection reset"));
        }

        self.inner.transition(request_id, expected, change).await
    }

    async fn list(&self, filter: RequestFilter) -> EngineResult<Vec<ServiceRequest>> {
        self.inner.list(filter).await
    }

    async fn count_by_status(&self) -> EngineResult<HashMap<RequestStatus, usize>> {
        self.inner.count_by_status().await
    }
}

/// Request store whose reads never finish
pub struct StalledRequestStore;

#[async_trait]
impl RequestStore for StalledRequestStore {
    async fn insert(&self, _request: ServiceRequest) -> EngineResult<()> {
        Ok(())
    }

    async fn get(&self, _request_id: RequestId) -> EngineResult<Option<ServiceRequest>> {
        std::future::pending().await
    }

    async fn transition(
        &self,
        _request_id: RequestId,
        _expected: RequestStatus,
        _change: RequestChange,
    ) -> EngineResult<ServiceRequest> {
        std::future::pending().await
    }

    async fn list(&self, _filter: RequestFilter) -> EngineResult<Vec<ServiceRequest>> {
        std::future::pending().await
    }

    async fn count_by_status(&self) -> EngineResult<HashMap<RequestStatus, usize>> {
        std::future::pending().await
    }
}

/// Rejection store whose adds park until the test releases them
///
/// Lets a test hold a decline between its status check and its write while
/// another operation commits.
#[derive(Default)]
pub struct GatedRejectionStore {
    inner: InMemoryRejectionStore,
    entered: Notify,
    release: Notify,
}

impl GatedRejectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until an add is parked at the gate
    pub async fn wait_for_add(&self) {
        self.entered.notified().await;
    }

    /// Let one parked add through
    pub fn release_add(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl RejectionStore for GatedRejectionStore {
    async fn add(&self, request_id: RequestId, professional_id: &str) -> EngineResult<bool> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.add(request_id, professional_id).await
    }

    async fn count(&self, request_id: RequestId) -> EngineResult<usize> {
        self.inner.count(request_id).await
    }

    async fn remove(&self, request_id: RequestId, professional_id: &str) -> EngineResult<()> {
        self.inner.remove(request_id, professional_id).await
    }

    async fn clear(&self, request_id: RequestId) -> EngineResult<()> {
        self.inner.clear(request_id).await
    }
}
