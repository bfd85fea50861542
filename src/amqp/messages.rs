//! AMQP message definitions and serialization

use crate::error::{Result, ServiceError};
use crate::types::LifecycleEvent;
use serde_json;

/// Topic exchange receiving every lifecycle event
pub const REQUEST_EVENTS_EXCHANGE: &str = "dispatch.request_events";

/// Routing keys for events
pub const REQUEST_ACCEPTED_ROUTING_KEY: &str = "request.accepted";
pub const REQUEST_RESOLVED_ROUTING_KEY: &str = "request.resolved";
pub const REQUEST_CANCELED_ROUTING_KEY: &str = "request.canceled";
pub const REQUEST_COMPLETED_ROUTING_KEY: &str = "request.completed";
pub const PROFESSIONAL_REMINDER_ROUTING_KEY: &str = "professional.reminder";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: impl Into<String>) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key: routing_key.into(),
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            ServiceError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            ServiceError::InternalError {
                message: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Routing key for a lifecycle event
pub fn routing_key(event: &LifecycleEvent) -> &'static str {
    match event {
        LifecycleEvent::RequestAccepted(_) => REQUEST_ACCEPTED_ROUTING_KEY,
        LifecycleEvent::RequestResolved(_) => REQUEST_RESOLVED_ROUTING_KEY,
        LifecycleEvent::RequestCanceled(_) => REQUEST_CANCELED_ROUTING_KEY,
        LifecycleEvent::RequestCompleted(_) => REQUEST_COMPLETED_ROUTING_KEY,
        LifecycleEvent::ProfessionalReminder(_) => PROFESSIONAL_REMINDER_ROUTING_KEY,
    }
}
