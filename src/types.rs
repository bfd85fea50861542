//! Common types used throughout the dispatch service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for service requests
pub type RequestId = Uuid;

/// Identifier of a catalog service
pub type ServiceId = String;

/// Identifier of a service category
pub type CategoryId = String;

/// Identifier of a customer account
pub type CustomerId = String;

/// Identifier of a professional profile
pub type ProfessionalId = String;

/// Identifier of a stored address
pub type AddressId = String;

/// Lifecycle status of a service request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    /// Transient creation state, handled exactly like `Pending`
    Requested,
    Pending,
    Accepted,
    Completed,
    Rejected,
    Expired,
    CanceledByCustomer,
    CanceledByProfessional,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 8] = [
        RequestStatus::Requested,
        RequestStatus::Pending,
        RequestStatus::Accepted,
        RequestStatus::Completed,
        RequestStatus::Rejected,
        RequestStatus::Expired,
        RequestStatus::CanceledByCustomer,
        RequestStatus::CanceledByProfessional,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Requested => "requested",
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Expired => "expired",
            RequestStatus::CanceledByCustomer => "canceled-by-customer",
            RequestStatus::CanceledByProfessional => "canceled-by-professional",
        }
    }

    /// Collapses `Requested` into `Pending`
    pub fn normalized(self) -> Self {
        match self {
            RequestStatus::Requested => RequestStatus::Pending,
            other => other,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.normalized() == RequestStatus::Pending
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed
                | RequestStatus::Rejected
                | RequestStatus::Expired
                | RequestStatus::CanceledByCustomer
                | RequestStatus::CanceledByProfessional
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown request status: {}", s))
    }
}

/// Role in which an actor invokes an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Customer,
    Professional,
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorRole::Customer => write!(f, "customer"),
            ActorRole::Professional => write!(f, "professional"),
        }
    }
}

/// Rolling rating summary kept on professionals and services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    /// Average of all non-null ratings on completed requests
    pub average: Option<f64>,
    /// Number of completed requests
    pub completed: u64,
}

/// Catalog service as seen by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub category: CategoryId,
    pub base_price: f64,
    #[serde(default)]
    pub rating: RatingSummary,
}

/// Approved (or pending approval) service provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Professional {
    pub id: ProfessionalId,
    pub category: CategoryId,
    /// Postal code of the owning user's registered address
    pub postal_code: String,
    pub is_approved: bool,
    #[serde(default)]
    pub rating: RatingSummary,
}

/// Address reference resolved to the only field the engine needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub postal_code: String,
}

/// The central service request entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: RequestId,
    pub service_id: ServiceId,
    pub customer_id: CustomerId,
    pub address_id: AddressId,
    pub requested_at: DateTime<Utc>,
    pub professional: Option<ProfessionalId>,
    pub status: RequestStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub rating: Option<u8>,
    pub review: Option<String>,
    pub billed_amount: Option<f64>,
}

impl ServiceRequest {
    /// Create a request in `Pending` as handed over by the booking flow
    pub fn new_pending(
        id: RequestId,
        service_id: ServiceId,
        customer_id: CustomerId,
        address_id: AddressId,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            service_id,
            customer_id,
            address_id,
            requested_at,
            professional: None,
            status: RequestStatus::Pending,
            completed_at: None,
            rating: None,
            review: None,
            billed_amount: None,
        }
    }

    pub fn is_assigned_to(&self, professional_id: &str) -> bool {
        self.professional.as_deref() == Some(professional_id)
    }

    pub fn is_owned_by(&self, customer_id: &str) -> bool {
        self.customer_id == customer_id
    }
}

/// Outcome of a successful accept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptOutcome {
    pub request_id: RequestId,
    pub professional_id: ProfessionalId,
    pub accepted_at: DateTime<Utc>,
}

/// Outcome of a recorded rejection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectOutcome {
    pub request_id: RequestId,
    /// Distinct professionals who declined so far
    pub rejections: usize,
    /// Eligible professionals at decision time
    pub eligible: usize,
    /// `Some(Rejected)` when this call terminated the request
    pub terminal: Option<RequestStatus>,
}

/// Outcome of a cancellation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub request_id: RequestId,
    pub previous_status: RequestStatus,
    pub status: RequestStatus,
}

/// Outcome of a completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteOutcome {
    pub request_id: RequestId,
    pub billed_amount: f64,
    pub completed_at: DateTime<Utc>,
}

/// Availability of one service at a postal code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAvailability {
    pub service_id: ServiceId,
    pub category: CategoryId,
    pub eligible_professionals: usize,
    pub serviceable: bool,
}

/// Answer to "can these services be booked at this postal code"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceabilityReport {
    pub postal_code: String,
    pub services: Vec<ServiceAvailability>,
}

impl ServiceabilityReport {
    pub fn all_serviceable(&self) -> bool {
        self.services.iter().all(|s| s.serviceable)
    }

    pub fn unserviceable(&self) -> Vec<&ServiceId> {
        self.services
            .iter()
            .filter(|s| !s.serviceable)
            .map(|s| &s.service_id)
            .collect()
    }
}

/// Who drove a request into a terminal rejected/expired state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedBy {
    Professional { professional_id: ProfessionalId },
    Sweep,
}

/// Event emitted when a professional accepts a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAccepted {
    pub request_id: RequestId,
    pub professional_id: ProfessionalId,
    pub customer_id: CustomerId,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a pending request ends as rejected or expired
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestResolved {
    pub request_id: RequestId,
    pub customer_id: CustomerId,
    pub status: RequestStatus,
    pub rejections: usize,
    pub eligible: usize,
    pub resolved_by: ResolvedBy,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a request is canceled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCanceled {
    pub request_id: RequestId,
    pub actor_id: String,
    pub actor_role: ActorRole,
    pub status: RequestStatus,
    pub professional_id: Option<ProfessionalId>,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a request is completed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCompleted {
    pub request_id: RequestId,
    pub professional_id: ProfessionalId,
    pub customer_id: CustomerId,
    pub rating: u8,
    pub billed_amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// Reminder for a professional holding an accepted request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfessionalReminder {
    pub request_id: RequestId,
    pub professional_id: ProfessionalId,
    pub service_id: ServiceId,
    pub requested_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all published lifecycle messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    RequestAccepted(RequestAccepted),
    RequestResolved(RequestResolved),
    RequestCanceled(RequestCanceled),
    RequestCompleted(RequestCompleted),
    ProfessionalReminder(ProfessionalReminder),
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::RequestAccepted(_) => "RequestAccepted",
            LifecycleEvent::RequestResolved(_) => "RequestResolved",
            LifecycleEvent::RequestCanceled(_) => "RequestCanceled",
            LifecycleEvent::RequestCompleted(_) => "RequestCompleted",
            LifecycleEvent::ProfessionalReminder(_) => "ProfessionalReminder",
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            LifecycleEvent::RequestAccepted(e) => e.request_id,
            LifecycleEvent::RequestResolved(e) => e.request_id,
            LifecycleEvent::RequestCanceled(e) => e.request_id,
            LifecycleEvent::RequestCompleted(e) => e.request_id,
            LifecycleEvent::ProfessionalReminder(e) => e.request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        for status in RequestStatus::ALL {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&RequestStatus::CanceledByProfessional).unwrap();
        assert_eq!(json, "\"canceled-by-professional\"");
    }

    #[test]
    fn test_requested_collapses_into_pending() {
        assert!(RequestStatus::Requested.is_pending());
        assert_eq!(RequestStatus::Requested.normalized(), RequestStatus::Pending);
        assert!(!RequestStatus::Accepted.is_terminal());
        assert!(RequestStatus::Expired.is_terminal());
    }
}
