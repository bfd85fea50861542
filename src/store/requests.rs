//! Service request storage interface and the in-memory implementation
//!
//! All status changes go through [`RequestStore::transition`], a conditional
//! update that applies a [`RequestChange`] only while the stored status still
//! equals the status the caller observed. A relational backend implements it
//! as `UPDATE ... WHERE id = $1 AND status = $2`.

use crate::error::{EngineError, EngineResult};
use crate::types::{ProfessionalId, RequestId, RequestStatus, ServiceId, ServiceRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// A single atomic mutation of a service request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestChange {
    /// pending -> accepted, records the professional
    Assign { professional_id: ProfessionalId },
    /// Move to a terminal status without touching any other field
    Resolve { status: RequestStatus },
    /// accepted -> completed with all completion fields
    Complete {
        completed_at: DateTime<Utc>,
        rating: u8,
        review: Option<String>,
        billed_amount: f64,
    },
    /// Replace rating and review on a completed request
    Review { rating: u8, review: Option<String> },
}

impl RequestChange {
    /// Operation name used in errors, logs and metrics
    pub fn operation(&self) -> &'static str {
        match self {
            RequestChange::Assign { .. } => "accept",
            RequestChange::Resolve { status } => match status {
                RequestStatus::Rejected => "reject",
                RequestStatus::Expired => "expire",
                RequestStatus::CanceledByCustomer | RequestStatus::CanceledByProfessional => {
                    "cancel"
                }
                _ => "resolve",
            },
            RequestChange::Complete { .. } => "complete",
            RequestChange::Review { .. } => "review",
        }
    }

    /// Status the request ends up in after this change
    pub fn target_status(&self) -> RequestStatus {
        match self {
            RequestChange::Assign { .. } => RequestStatus::Accepted,
            RequestChange::Resolve { status } => *status,
            RequestChange::Complete { .. } | RequestChange::Review { .. } => {
                RequestStatus::Completed
            }
        }
    }

    pub fn apply(self, request: &mut ServiceRequest) {
        match self {
            RequestChange::Assign { professional_id } => {
                request.professional = Some(professional_id);
                request.status = RequestStatus::Accepted;
            }
            RequestChange::Resolve { status } => {
                request.status = status;
            }
            RequestChange::Complete {
                completed_at,
                rating,
                review,
                billed_amount,
            } => {
                request.status = RequestStatus::Completed;
                request.completed_at = Some(completed_at);
                request.rating = Some(rating);
                request.review = review;
                request.billed_amount = Some(billed_amount);
            }
            RequestChange::Review { rating, review } => {
                request.rating = Some(rating);
                request.review = review;
            }
        }
    }
}

/// Query filter for listing requests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub professional_id: Option<ProfessionalId>,
    pub service_id: Option<ServiceId>,
    /// Only requests with `requested_at` strictly before this instant
    pub requested_before: Option<DateTime<Utc>>,
}

impl RequestFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: RequestStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Pending requests older than `cutoff`
    pub fn stale_pending(cutoff: DateTime<Utc>) -> Self {
        Self {
            status: Some(RequestStatus::Pending),
            requested_before: Some(cutoff),
            ..Self::default()
        }
    }

    pub fn completed_by_professional(professional_id: &str) -> Self {
        Self {
            status: Some(RequestStatus::Completed),
            professional_id: Some(professional_id.to_string()),
            ..Self::default()
        }
    }

    pub fn completed_for_service(service_id: &str) -> Self {
        Self {
            status: Some(RequestStatus::Completed),
            service_id: Some(service_id.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, request: &ServiceRequest) -> bool {
        if let Some(status) = self.status {
            if request.status.normalized() != status.normalized() {
                return false;
            }
        }
        if let Some(professional_id) = &self.professional_id {
            if !request.is_assigned_to(professional_id) {
                return false;
            }
        }
        if let Some(service_id) = &self.service_id {
            if &request.service_id != service_id {
                return false;
            }
        }
        if let Some(cutoff) = self.requested_before {
            if request.requested_at >= cutoff {
                return false;
            }
        }
        true
    }
}

/// Trait for service request persistence
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new request; fails if the id already exists
    async fn insert(&self, request: ServiceRequest) -> EngineResult<()>;

    /// Get a request by id
    async fn get(&self, id: RequestId) -> EngineResult<Option<ServiceRequest>>;

    /// Apply `change` iff the stored status equals `expected`, returning the
    /// updated row. A mismatch yields `InvalidTransition` carrying the
    /// current status and leaves the row untouched.
    async fn transition(
        &self,
        id: RequestId,
        expected: RequestStatus,
        change: RequestChange,
    ) -> EngineResult<ServiceRequest>;

    /// List requests matching a filter, oldest first
    async fn list(&self, filter: RequestFilter) -> EngineResult<Vec<ServiceRequest>>;

    /// Number of requests per status
    async fn count_by_status(&self) -> EngineResult<HashMap<RequestStatus, usize>>;
}

/// In-memory request store
#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<RequestId, ServiceRequest>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_error() -> EngineError {
        EngineError::storage("Failed to acquire request store lock")
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert(&self, request: ServiceRequest) -> EngineResult<()> {
        let mut requests = self.requests.write().map_err(|_| Self::lock_error())?;

        if requests.contains_key(&request.id) {
            return Err(EngineError::storage(format!(
                "Request {} already exists",
                request.id
            )));
        }

        requests.insert(request.id, request);
        Ok(())
    }

    async fn get(&self, id: RequestId) -> EngineResult<Option<ServiceRequest>> {
        let requests = self.requests.read().map_err(|_| Self::lock_error())?;
        Ok(requests.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: RequestId,
        expected: RequestStatus,
        change: RequestChange,
    ) -> EngineResult<ServiceRequest> {
        let mut requests = self.requests.write().map_err(|_| Self::lock_error())?;

        let request = requests
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("request", id))?;

        if request.status.normalized() != expected.normalized() {
            return Err(EngineError::InvalidTransition {
                request_id: id,
                status: request.status,
                operation: change.operation(),
            });
        }

        change.apply(request);
        Ok(request.clone())
    }

    async fn list(&self, filter: RequestFilter) -> EngineResult<Vec<ServiceRequest>> {
        let requests = self.requests.read().map_err(|_| Self::lock_error())?;

        let mut matching: Vec<ServiceRequest> = requests
            .values()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect();
        matching.sort_by_key(|request| request.requested_at);

        Ok(matching)
    }

    async fn count_by_status(&self) -> EngineResult<HashMap<RequestStatus, usize>> {
        let requests = self.requests.read().map_err(|_| Self::lock_error())?;

        let mut counts = HashMap::new();
        for request in requests.values() {
            *counts.entry(request.status.normalized()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
