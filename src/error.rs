//! Error types for the dispatch service
//!
//! Engine operations return [`EngineError`] so callers can branch on the
//! failure kind. Service plumbing (configuration, AMQP, startup) uses anyhow
//! for consistent error handling throughout the application.

use crate::types::{RequestId, RequestStatus};

/// Result type alias for service plumbing
pub type Result<T> = anyhow::Result<T>;

/// Result type alias for engine operations and store traits
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors reported by the request lifecycle engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Cannot {operation} request {request_id} in status {status}")]
    InvalidTransition {
        request_id: RequestId,
        status: RequestStatus,
        operation: &'static str,
    },

    #[error("Professional {professional_id} is not eligible: {reason}")]
    NotEligible {
        professional_id: String,
        reason: String,
    },

    #[error("Actor {actor_id} is not authorized to {operation} request {request_id}")]
    NotAuthorized {
        actor_id: String,
        request_id: RequestId,
        operation: &'static str,
    },

    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    #[error("Store operation failed: {message}")]
    Storage { message: String },

    #[error("Store operation '{operation}' timed out after {timeout_ms}ms")]
    StoreTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },
}

/// Errors raised by service plumbing around the engine
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Event publish failed: {message}")]
    PublishFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Store-level failures that may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::StoreTimeout { .. })
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotEligible { .. } => "not_eligible",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::Validation { .. } => "validation",
            Self::Storage { .. } => "storage",
            Self::StoreTimeout { .. } => "store_timeout",
        }
    }
}
