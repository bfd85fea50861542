//! Eligibility of professionals for a service request
//!
//! A professional is eligible when approved, in the service's category and
//! registered at the postal code of the request's address. Counts are read
//! from the directory on every call and never cached.

use crate::error::{EngineError, EngineResult};
use crate::store::{bounded, Directory};
use crate::types::{CategoryId, Professional, Service, ServiceRequest};
use std::sync::Arc;
use std::time::Duration;

/// Category and location a request is matched against
#[derive(Debug, Clone)]
pub struct MatchContext {
    pub service: Service,
    pub postal_code: String,
}

impl MatchContext {
    pub fn category(&self) -> &CategoryId {
        &self.service.category
    }
}

/// Resolves match contexts and eligibility against the directory
#[derive(Clone)]
pub struct EligibilityResolver {
    directory: Arc<dyn Directory>,
    timeout: Duration,
}

impl EligibilityResolver {
    pub fn new(directory: Arc<dyn Directory>, timeout: Duration) -> Self {
        Self { directory, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn service(&self, service_id: &str) -> EngineResult<Service> {
        bounded(
            self.timeout,
            "get_service",
            self.directory.service(service_id),
        )
        .await?
        .ok_or_else(|| EngineError::not_found("service", service_id))
    }

    pub async fn professional(&self, professional_id: &str) -> EngineResult<Professional> {
        bounded(
            self.timeout,
            "get_professional",
            self.directory.professional(professional_id),
        )
        .await?
        .ok_or_else(|| EngineError::not_found("professional", professional_id))
    }

    /// Resolve the service category and address postal code of a request
    pub async fn context_for(&self, request: &ServiceRequest) -> EngineResult<MatchContext> {
        let service = self.service(&request.service_id).await?;
        let address = bounded(
            self.timeout,
            "get_address",
            self.directory.address(&request.address_id),
        )
        .await?
        .ok_or_else(|| EngineError::not_found("address", &request.address_id))?;

        Ok(MatchContext {
            service,
            postal_code: address.postal_code,
        })
    }

    /// Number of approved professionals for a category at a postal code
    pub async fn eligible_count(&self, category: &str, postal_code: &str) -> EngineResult<usize> {
        bounded(
            self.timeout,
            "count_eligible",
            self.directory.count_eligible(category, postal_code),
        )
        .await
    }

    /// Eligible count for an already-resolved context
    pub async fn eligible_for(&self, context: &MatchContext) -> EngineResult<usize> {
        self.eligible_count(context.category(), &context.postal_code)
            .await
    }

    /// Load a professional and check it may act on a request in `context`
    pub async fn ensure_eligible(
        &self,
        professional_id: &str,
        context: &MatchContext,
    ) -> EngineResult<Professional> {
        let professional = self.professional(professional_id).await?;
        check_eligibility(&professional, context)?;
        Ok(professional)
    }

    /// Load a professional and check only the approval flag
    ///
    /// Declining needs no category or area match, so a request nobody can
    /// serve still terminates on the first decline.
    pub async fn ensure_approved(&self, professional_id: &str) -> EngineResult<Professional> {
        let professional = self.professional(professional_id).await?;
        if !professional.is_approved {
            return Err(EngineError::NotEligible {
                professional_id: professional.id,
                reason: "professional is not approved".to_string(),
            });
        }
        Ok(professional)
    }
}

/// Pure eligibility predicate
pub fn check_eligibility(professional: &Professional, context: &MatchContext) -> EngineResult<()> {
    let reason = if !professional.is_approved {
        "professional is not approved".to_string()
    } else if &professional.category != context.category() {
        format!(
            "category {} does not match {}",
            professional.category,
            context.category()
        )
    } else if professional.postal_code != context.postal_code {
        format!(
            "postal code {} does not match {}",
            professional.postal_code, context.postal_code
        )
    } else {
        return Ok(());
    };

    Err(EngineError::NotEligible {
        professional_id: professional.id.clone(),
        reason,
    })
}
