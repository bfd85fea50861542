//! Rejection tracking
//!
//! A per-request set of professionals who declined. Adds are set inserts
//! performed by the backing store, never read-count-increment-write, so
//! concurrent rejections from different professionals are all retained.

use crate::error::{EngineError, EngineResult};
use crate::store::bounded;
use crate::types::{ProfessionalId, RequestId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Key under which a shared set store keeps the rejections for a request
pub fn rejection_key(request_id: RequestId) -> String {
    format!("service_request_rejections:{}", request_id)
}

/// Set store for per-request rejections
#[async_trait]
pub trait RejectionStore: Send + Sync {
    /// Insert a professional into the request's set, true if newly added
    async fn add(&self, request_id: RequestId, professional_id: &str) -> EngineResult<bool>;

    /// Cardinality of the request's set, zero when absent
    async fn count(&self, request_id: RequestId) -> EngineResult<usize>;

    /// Remove one professional from the request's set
    async fn remove(&self, request_id: RequestId, professional_id: &str) -> EngineResult<()>;

    /// Remove the request's set entirely
    async fn clear(&self, request_id: RequestId) -> EngineResult<()>;
}

/// In-memory rejection store
#[derive(Debug, Default)]
pub struct InMemoryRejectionStore {
    sets: RwLock<HashMap<RequestId, HashSet<ProfessionalId>>>,
}

impl InMemoryRejectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_error() -> EngineError {
        EngineError::storage("Failed to acquire rejection store lock")
    }
}

#[async_trait]
impl RejectionStore for InMemoryRejectionStore {
    async fn add(&self, request_id: RequestId, professional_id: &str) -> EngineResult<bool> {
        let mut sets = self.sets.write().map_err(|_| Self::lock_error())?;
        Ok(sets
            .entry(request_id)
            .or_default()
            .insert(professional_id.to_string()))
    }

    async fn count(&self, request_id: RequestId) -> EngineResult<usize> {
        let sets = self.sets.read().map_err(|_| Self::lock_error())?;
        Ok(sets.get(&request_id).map(HashSet::len).unwrap_or(0))
    }

    async fn remove(&self, request_id: RequestId, professional_id: &str) -> EngineResult<()> {
        let mut sets = self.sets.write().map_err(|_| Self::lock_error())?;
        if let Some(set) = sets.get_mut(&request_id) {
            set.remove(professional_id);
            if set.is_empty() {
                sets.remove(&request_id);
            }
        }
        Ok(())
    }

    async fn clear(&self, request_id: RequestId) -> EngineResult<()> {
        let mut sets = self.sets.write().map_err(|_| Self::lock_error())?;
        sets.remove(&request_id);
        Ok(())
    }
}

/// Engine-facing wrapper that bounds every call to the rejection store
#[derive(Clone)]
pub struct RejectionTracker {
    store: Arc<dyn RejectionStore>,
    timeout: Duration,
}

impl RejectionTracker {
    pub fn new(store: Arc<dyn RejectionStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn add_rejection(
        &self,
        request_id: RequestId,
        professional_id: &str,
    ) -> EngineResult<bool> {
        bounded(
            self.timeout,
            "add_rejection",
            self.store.add(request_id, professional_id),
        )
        .await
    }

    pub async fn count(&self, request_id: RequestId) -> EngineResult<usize> {
        bounded(
            self.timeout,
            "count_rejections",
            self.store.count(request_id),
        )
        .await
    }

    /// Take back a decline recorded for a request that left pending meanwhile
    pub async fn withdraw(&self, request_id: RequestId, professional_id: &str) -> EngineResult<()> {
        bounded(
            self.timeout,
            "withdraw_rejection",
            self.store.remove(request_id, professional_id),
        )
        .await
    }

    pub async fn clear(&self, request_id: RequestId) -> EngineResult<()> {
        bounded(
            self.timeout,
            "clear_rejections",
            self.store.clear(request_id),
        )
        .await
    }
}
