//! Request lifecycle engine
//!
//! Every status change is a conditional store transition guarded by the
//! status the engine observed when it loaded the request. Concurrent callers
//! racing on the same request therefore see exactly one winner; the others
//! get `InvalidTransition` and the row is left as the winner wrote it.
//!
//! Side effects that follow a committed transition (clearing rejections,
//! recomputing ratings, publishing events) never undo it. Their failures are
//! logged and counted.

use crate::amqp::publisher::EventPublisher;
use crate::clock::{Clock, SystemClock};
use crate::completion::{billed_amount, RatingAggregator};
use crate::config::EngineSettings;
use crate::error::{EngineError, EngineResult, Result};
use crate::lifecycle::state::{cancel_target, validate_transition};
use crate::matching::{EligibilityResolver, MatchContext, RejectionStore, RejectionTracker};
use crate::metrics::MetricsCollector;
use crate::stats::StatsSnapshot;
use crate::store::{bounded, Directory, RequestChange, RequestFilter, RequestStore};
use crate::sweeper::{ExpirySweeper, SweepReport};
use crate::types::*;
use crate::utils::generate_request_id;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The service request lifecycle engine
#[derive(Clone)]
pub struct RequestEngine {
    requests: Arc<dyn RequestStore>,
    directory: Arc<dyn Directory>,
    tracker: RejectionTracker,
    eligibility: EligibilityResolver,
    aggregator: RatingAggregator,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RequestEngine {
    /// Create an engine with default settings and the system clock
    pub fn new(
        requests: Arc<dyn RequestStore>,
        rejections: Arc<dyn RejectionStore>,
        directory: Arc<dyn Directory>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let settings = EngineSettings::default();
        let timeout = settings.store_timeout();

        Self {
            tracker: RejectionTracker::new(rejections, timeout),
            eligibility: EligibilityResolver::new(directory.clone(), timeout),
            aggregator: RatingAggregator::new(requests.clone(), directory.clone(), timeout),
            requests,
            directory,
            publisher,
            clock: Arc::new(SystemClock),
            settings,
            metrics: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, settings: EngineSettings) -> Self {
        let timeout = settings.store_timeout();
        self.tracker = self.tracker.with_timeout(timeout);
        self.eligibility = self.eligibility.with_timeout(timeout);
        self.aggregator =
            RatingAggregator::new(self.requests.clone(), self.directory.clone(), timeout);
        self.settings = settings;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    /// Sweeper bound to this engine and its settings
    pub fn expiry_sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(self.clone())
    }

    /// Register a freshly booked request in `pending`
    pub async fn create_pending(
        &self,
        service_id: &str,
        customer_id: &str,
        address_id: &str,
        requested_at: DateTime<Utc>,
    ) -> EngineResult<RequestId> {
        let started = Instant::now();
        let result = self
            .create_pending_inner(service_id, customer_id, address_id, requested_at)
            .await;
        self.observe("create", started, &result);
        result
    }

    async fn create_pending_inner(
        &self,
        service_id: &str,
        customer_id: &str,
        address_id: &str,
        requested_at: DateTime<Utc>,
    ) -> EngineResult<RequestId> {
        if customer_id.is_empty() {
            return Err(EngineError::Validation {
                reason: "customer id cannot be empty".to_string(),
            });
        }

        let request = ServiceRequest::new_pending(
            generate_request_id(),
            service_id.to_string(),
            customer_id.to_string(),
            address_id.to_string(),
            requested_at,
        );

        // Resolves both references so a dangling service or address fails here
        let context = self.eligibility.context_for(&request).await?;

        let request_id = request.id;
        self.store_call("insert_request", self.requests.insert(request))
            .await?;

        info!(
            "Request {} created for service {} ({}) at {}",
            request_id,
            service_id,
            context.category(),
            context.postal_code
        );
        Ok(request_id)
    }

    /// Fetch a request by id
    pub async fn get(&self, request_id: RequestId) -> EngineResult<ServiceRequest> {
        self.store_call("get_request", self.requests.get(request_id))
            .await?
            .ok_or_else(|| EngineError::not_found("request", request_id))
    }

    /// A professional takes a pending request
    pub async fn accept(
        &self,
        request_id: RequestId,
        professional_id: &str,
    ) -> EngineResult<AcceptOutcome> {
        let started = Instant::now();
        let result = self.accept_inner(request_id, professional_id).await;
        self.observe("accept", started, &result);
        result
    }

    async fn accept_inner(
        &self,
        request_id: RequestId,
        professional_id: &str,
    ) -> EngineResult<AcceptOutcome> {
        let request = self.get(request_id).await?;
        ensure_status(&request, request.status.is_pending(), "accept")?;

        let context = self.eligibility.context_for(&request).await?;
        self.eligibility
            .ensure_eligible(professional_id, &context)
            .await?;

        let updated = self
            .commit(
                &request,
                RequestChange::Assign {
                    professional_id: professional_id.to_string(),
                },
            )
            .await?;

        let accepted_at = self.clock.now();
        info!(
            "Request {} accepted by professional {}",
            request_id, professional_id
        );

        let cleared = self.tracker.clear(request_id).await;
        self.side_effect("clear_rejections", request_id, cleared);

        let published = self
            .publisher
            .publish_request_accepted(RequestAccepted {
                request_id,
                professional_id: professional_id.to_string(),
                customer_id: updated.customer_id.clone(),
                timestamp: accepted_at,
            })
            .await;
        self.published("RequestAccepted", request_id, published);

        Ok(AcceptOutcome {
            request_id,
            professional_id: professional_id.to_string(),
            accepted_at,
        })
    }

    /// A professional declines a pending request
    ///
    /// Once every eligible professional has declined, the request moves to
    /// `rejected`. With no eligible professionals at all, a single decline
    /// is enough.
    pub async fn reject(
        &self,
        request_id: RequestId,
        professional_id: &str,
    ) -> EngineResult<RejectOutcome> {
        let started = Instant::now();
        let result = self.reject_inner(request_id, professional_id).await;
        self.observe("reject", started, &result);
        result
    }

    async fn reject_inner(
        &self,
        request_id: RequestId,
        professional_id: &str,
    ) -> EngineResult<RejectOutcome> {
        let request = self.get(request_id).await?;
        ensure_status(&request, request.status.is_pending(), "reject")?;

        let context = self.eligibility.context_for(&request).await?;
        self.eligibility.ensure_approved(professional_id).await?;

        let added = self
            .tracker
            .add_rejection(request_id, professional_id)
            .await?;
        if added {
            if let Some(metrics) = &self.metrics {
                metrics.record_rejection();
            }
        } else {
            debug!(
                "Professional {} already declined request {}",
                professional_id, request_id
            );
        }

        // Re-read after the add so concurrent declines are all counted
        let rejections = self.tracker.count(request_id).await?;
        let eligible = self.eligibility.eligible_for(&context).await?;

        if rejections < eligible {
            // The decline only stands if the request was still pending once it landed
            let current = self.get(request_id).await?;
            if !current.status.is_pending() {
                return Err(self.lost_decline(&current, professional_id, added).await);
            }

            debug!(
                "Request {} declined by {} ({}/{} eligible)",
                request_id, professional_id, rejections, eligible
            );
            return Ok(RejectOutcome {
                request_id,
                rejections,
                eligible,
                terminal: None,
            });
        }

        let updated = match self
            .commit(
                &request,
                RequestChange::Resolve {
                    status: RequestStatus::Rejected,
                },
            )
            .await
        {
            Ok(updated) => updated,
            Err(EngineError::InvalidTransition { .. }) => {
                let current = self.get(request_id).await?;
                return Err(self.lost_decline(&current, professional_id, added).await);
            }
            Err(e) => return Err(e),
        };

        info!(
            "Request {} rejected by all eligible professionals ({}/{})",
            request_id, rejections, eligible
        );

        let published = self
            .publisher
            .publish_request_resolved(RequestResolved {
                request_id,
                customer_id: updated.customer_id.clone(),
                status: RequestStatus::Rejected,
                rejections,
                eligible,
                resolved_by: ResolvedBy::Professional {
                    professional_id: professional_id.to_string(),
                },
                timestamp: self.clock.now(),
            })
            .await;
        self.published("RequestResolved", request_id, published);

        Ok(RejectOutcome {
            request_id,
            rejections,
            eligible,
            terminal: Some(RequestStatus::Rejected),
        })
    }

    /// Cancel a request on behalf of its customer or its assigned professional
    pub async fn cancel(
        &self,
        request_id: RequestId,
        actor_id: &str,
        actor_role: ActorRole,
    ) -> EngineResult<CancelOutcome> {
        let started = Instant::now();
        let result = self.cancel_inner(request_id, actor_id, actor_role).await;
        self.observe("cancel", started, &result);
        result
    }

    async fn cancel_inner(
        &self,
        request_id: RequestId,
        actor_id: &str,
        actor_role: ActorRole,
    ) -> EngineResult<CancelOutcome> {
        let request = self.get(request_id).await?;
        let target = cancel_target(request.status, actor_role).ok_or(
            EngineError::InvalidTransition {
                request_id,
                status: request.status,
                operation: "cancel",
            },
        )?;

        let authorized = match actor_role {
            ActorRole::Customer => request.is_owned_by(actor_id),
            ActorRole::Professional => request.is_assigned_to(actor_id),
        };
        if !authorized {
            return Err(EngineError::NotAuthorized {
                actor_id: actor_id.to_string(),
                request_id,
                operation: "cancel",
            });
        }

        let updated = self
            .commit(&request, RequestChange::Resolve { status: target })
            .await?;

        info!(
            "Request {} canceled by {} {} ({} -> {})",
            request_id, actor_role, actor_id, request.status, target
        );

        let published = self
            .publisher
            .publish_request_canceled(RequestCanceled {
                request_id,
                actor_id: actor_id.to_string(),
                actor_role,
                status: target,
                professional_id: updated.professional.clone(),
                timestamp: self.clock.now(),
            })
            .await;
        self.published("RequestCanceled", request_id, published);

        Ok(CancelOutcome {
            request_id,
            previous_status: request.status,
            status: target,
        })
    }

    /// Close an accepted request with a rating and optional review
    pub async fn complete(
        &self,
        request_id: RequestId,
        actor_id: &str,
        rating: u8,
        review: Option<String>,
    ) -> EngineResult<CompleteOutcome> {
        let started = Instant::now();
        let result = self
            .complete_inner(request_id, actor_id, rating, review)
            .await;
        self.observe("complete", started, &result);
        result
    }

    async fn complete_inner(
        &self,
        request_id: RequestId,
        actor_id: &str,
        rating: u8,
        review: Option<String>,
    ) -> EngineResult<CompleteOutcome> {
        let request = self.get(request_id).await?;
        ensure_status(
            &request,
            request.status == RequestStatus::Accepted,
            "complete",
        )?;

        if !request.is_assigned_to(actor_id) && !request.is_owned_by(actor_id) {
            return Err(EngineError::NotAuthorized {
                actor_id: actor_id.to_string(),
                request_id,
                operation: "complete",
            });
        }
        self.validate_rating(rating)?;

        let service = self.eligibility.service(&request.service_id).await?;
        let completed_at = self.clock.now();
        let amount = billed_amount(service.base_price, request.requested_at, completed_at);

        let updated = self
            .commit(
                &request,
                RequestChange::Complete {
                    completed_at,
                    rating,
                    review: normalize_review(review),
                    billed_amount: amount,
                },
            )
            .await?;

        info!(
            "Request {} completed, rating {}, billed {:.2}",
            request_id, rating, amount
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_billed_amount(amount);
        }

        let recomputed = self.aggregator.recompute_for(&updated).await;
        self.side_effect("rating_recompute", request_id, recomputed);

        match updated.professional.clone() {
            Some(professional_id) => {
                let published = self
                    .publisher
                    .publish_request_completed(RequestCompleted {
                        request_id,
                        professional_id,
                        customer_id: updated.customer_id.clone(),
                        rating,
                        billed_amount: amount,
                        timestamp: completed_at,
                    })
                    .await;
                self.published("RequestCompleted", request_id, published);
            }
            None => {
                warn!(
                    "Completed request {} has no professional, RequestCompleted not published",
                    request_id
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_event_published("RequestCompleted", false);
                }
            }
        }

        Ok(CompleteOutcome {
            request_id,
            billed_amount: amount,
            completed_at,
        })
    }

    /// Replace the rating and review of a completed request
    pub async fn review(
        &self,
        request_id: RequestId,
        customer_id: &str,
        rating: u8,
        review: Option<String>,
    ) -> EngineResult<ServiceRequest> {
        let started = Instant::now();
        let result = self
            .review_inner(request_id, customer_id, rating, review)
            .await;
        self.observe("review", started, &result);
        result
    }

    async fn review_inner(
        &self,
        request_id: RequestId,
        customer_id: &str,
        rating: u8,
        review: Option<String>,
    ) -> EngineResult<ServiceRequest> {
        let request = self.get(request_id).await?;
        ensure_status(
            &request,
            request.status == RequestStatus::Completed,
            "review",
        )?;

        if !request.is_owned_by(customer_id) {
            return Err(EngineError::NotAuthorized {
                actor_id: customer_id.to_string(),
                request_id,
                operation: "review",
            });
        }
        self.validate_rating(rating)?;

        let updated = self
            .commit(
                &request,
                RequestChange::Review {
                    rating,
                    review: normalize_review(review),
                },
            )
            .await?;

        info!("Request {} review updated, rating {}", request_id, rating);

        let recomputed = self.aggregator.recompute_for(&updated).await;
        self.side_effect("rating_recompute", request_id, recomputed);

        Ok(updated)
    }

    /// Resolve every stale pending request as of `now`
    pub async fn run_expiry_sweep(&self, now: DateTime<Utc>) -> EngineResult<SweepReport> {
        self.expiry_sweeper().run_once(now).await
    }

    /// Pending requests whose age at `now` exceeds the expiry horizon
    pub async fn stale_pending(&self, now: DateTime<Utc>) -> EngineResult<Vec<ServiceRequest>> {
        let cutoff = now - self.settings.expiry_horizon();
        self.store_call(
            "list_requests",
            self.requests.list(RequestFilter::stale_pending(cutoff)),
        )
        .await
    }

    /// Resolve one stale request to `rejected` or `expired`
    ///
    /// Returns `None` when the request is no longer pending.
    pub async fn resolve_stale(&self, request_id: RequestId) -> EngineResult<Option<RequestStatus>> {
        let request = self.get(request_id).await?;
        if !request.status.is_pending() {
            return Ok(None);
        }

        let context = self.eligibility.context_for(&request).await?;
        let eligible = self.eligibility.eligible_for(&context).await?;
        let rejections = self.tracker.count(request_id).await?;

        let status = if rejections >= eligible {
            RequestStatus::Rejected
        } else {
            RequestStatus::Expired
        };

        let updated = match self
            .commit(&request, RequestChange::Resolve { status })
            .await
        {
            Ok(updated) => updated,
            Err(EngineError::InvalidTransition { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        info!(
            "Stale request {} resolved as {} ({}/{} eligible declined)",
            request_id, status, rejections, eligible
        );

        let published = self
            .publisher
            .publish_request_resolved(RequestResolved {
                request_id,
                customer_id: updated.customer_id.clone(),
                status,
                rejections,
                eligible,
                resolved_by: ResolvedBy::Sweep,
                timestamp: self.clock.now(),
            })
            .await;
        self.published("RequestResolved", request_id, published);

        Ok(Some(status))
    }

    /// Publish a reminder for every accepted request, returning how many went out
    pub async fn send_reminders(&self) -> EngineResult<usize> {
        let accepted = self
            .store_call(
                "list_requests",
                self.requests
                    .list(RequestFilter::with_status(RequestStatus::Accepted)),
            )
            .await?;

        let mut sent = 0;
        for request in accepted {
            let Some(professional_id) = request.professional.clone() else {
                warn!("Accepted request {} has no professional", request.id);
                continue;
            };

            let published = self
                .publisher
                .publish_professional_reminder(ProfessionalReminder {
                    request_id: request.id,
                    professional_id,
                    service_id: request.service_id.clone(),
                    requested_at: request.requested_at,
                    timestamp: self.clock.now(),
                })
                .await;
            if published.is_ok() {
                sent += 1;
            }
            self.published("ProfessionalReminder", request.id, published);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_reminders(sent);
        }
        Ok(sent)
    }

    /// Report which services have at least one eligible professional at a postal code
    pub async fn check_serviceability(
        &self,
        postal_code: &str,
        service_ids: &[ServiceId],
    ) -> EngineResult<ServiceabilityReport> {
        let mut services = Vec::with_capacity(service_ids.len());

        for service_id in service_ids {
            let service = self.eligibility.service(service_id).await?;
            let context = MatchContext {
                service,
                postal_code: postal_code.to_string(),
            };
            let eligible = self.eligibility.eligible_for(&context).await?;

            services.push(ServiceAvailability {
                service_id: service_id.clone(),
                category: context.service.category,
                eligible_professionals: eligible,
                serviceable: eligible > 0,
            });
        }

        Ok(ServiceabilityReport {
            postal_code: postal_code.to_string(),
            services,
        })
    }

    /// Recompute the marketplace stats snapshot
    pub async fn stats(&self) -> EngineResult<StatsSnapshot> {
        let snapshot = StatsSnapshot::compute(
            self.requests.as_ref(),
            self.directory.as_ref(),
            self.settings.store_timeout(),
            self.clock.now(),
        )
        .await?;

        if let Some(metrics) = &self.metrics {
            let mut counts = std::collections::HashMap::new();
            for status in RequestStatus::ALL {
                counts.insert(status, snapshot.count(status));
            }
            metrics.update_status_counts(&counts);
        }
        Ok(snapshot)
    }

    /// Undo a decline that raced another transition and build its error
    ///
    /// A request another decline drove to `rejected` keeps every decline
    /// that counted towards it. Any other winner discards the late entry.
    async fn lost_decline(
        &self,
        current: &ServiceRequest,
        professional_id: &str,
        added: bool,
    ) -> EngineError {
        if added && current.status != RequestStatus::Rejected {
            let withdrawn = self.tracker.withdraw(current.id, professional_id).await;
            self.side_effect("withdraw_rejection", current.id, withdrawn);
        }
        debug!(
            "Decline by {} on request {} lost to a concurrent transition ({})",
            professional_id, current.id, current.status
        );

        EngineError::InvalidTransition {
            request_id: current.id,
            status: current.status,
            operation: "reject",
        }
    }

    fn validate_rating(&self, rating: u8) -> EngineResult<()> {
        if self.settings.rating_in_range(rating) {
            Ok(())
        } else {
            Err(EngineError::Validation {
                reason: format!(
                    "rating {} outside {}..={}",
                    rating, self.settings.min_rating, self.settings.max_rating
                ),
            })
        }
    }

    /// Apply `change` guarded by the status observed in `request`
    async fn commit(
        &self,
        request: &ServiceRequest,
        change: RequestChange,
    ) -> EngineResult<ServiceRequest> {
        let from = request.status;
        let to = change.target_status();
        let operation = change.operation();

        if let Err(reason) = validate_transition(from, to) {
            debug!("Refusing {} on request {}: {}", operation, request.id, reason);
            return Err(EngineError::InvalidTransition {
                request_id: request.id,
                status: from,
                operation,
            });
        }

        let updated = self
            .store_call(
                "transition_request",
                self.requests.transition(request.id, from, change),
            )
            .await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_transition(from, to);
        }
        Ok(updated)
    }

    async fn store_call<T, F>(&self, operation: &'static str, fut: F) -> EngineResult<T>
    where
        F: std::future::Future<Output = EngineResult<T>>,
    {
        bounded(self.settings.store_timeout(), operation, fut).await
    }

    fn observe<T>(&self, operation: &'static str, started: Instant, result: &EngineResult<T>) {
        let kind = result.as_ref().err().map(EngineError::kind);
        if let Err(e) = result {
            debug!("{} failed: {}", operation, e);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(operation, started.elapsed(), kind);
        }
    }

    fn side_effect(&self, effect: &'static str, request_id: RequestId, result: EngineResult<impl Sized>) {
        if let Err(e) = result {
            warn!(
                "Post-commit {} failed for request {}: {}",
                effect, request_id, e
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_side_effect_failure(effect);
            }
        }
    }

    fn published(&self, event: &'static str, request_id: RequestId, result: Result<()>) {
        if let Err(e) = &result {
            warn!(
                "Failed to publish {} for request {}: {}",
                event, request_id, e
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_event_published(event, result.is_ok());
        }
    }
}

fn ensure_status(request: &ServiceRequest, allowed: bool, operation: &'static str) -> EngineResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            request_id: request.id,
            status: request.status,
            operation,
        })
    }
}

/// Blank reviews are stored as absent
fn normalize_review(review: Option<String>) -> Option<String> {
    review
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::{MockEventPublisher, RecordingEventPublisher};
    use crate::clock::ManualClock;
    use crate::matching::InMemoryRejectionStore;
    use crate::store::{InMemoryDirectory, InMemoryRequestStore};
    use chrono::Duration;

    struct Harness {
        engine: RequestEngine,
        requests: Arc<InMemoryRequestStore>,
        directory: Arc<InMemoryDirectory>,
        publisher: Arc<RecordingEventPublisher>,
        clock: Arc<ManualClock>,
    }

    fn directory_with(professionals: &[&str]) -> Arc<InMemoryDirectory> {
        let directory = InMemoryDirectory::new();
        directory.add_customer("cust_1").unwrap();
        directory
            .add_service(Service {
                id: "svc_plumbing".to_string(),
                name: "Pipe repair".to_string(),
                category: "plumbing".to_string(),
                base_price: 100.0,
                rating: RatingSummary::default(),
            })
            .unwrap();
        directory
            .add_address(Address {
                id: "addr_1".to_string(),
                postal_code: "560001".to_string(),
            })
            .unwrap();
        for id in professionals {
            directory
                .upsert_professional(Professional {
                    id: id.to_string(),
                    category: "plumbing".to_string(),
                    postal_code: "560001".to_string(),
                    is_approved: true,
                    rating: RatingSummary::default(),
                })
                .unwrap();
        }
        Arc::new(directory)
    }

    fn harness(professionals: &[&str]) -> Harness {
        let requests = Arc::new(InMemoryRequestStore::new());
        let directory = directory_with(professionals);
        let publisher = Arc::new(RecordingEventPublisher::new());
        let clock = Arc::new(ManualClock::default());

        let engine = RequestEngine::new(
            requests.clone(),
            Arc::new(InMemoryRejectionStore::new()),
            directory.clone(),
            publisher.clone(),
        )
        .with_clock(clock.clone());

        Harness {
            engine,
            requests,
            directory,
            publisher,
            clock,
        }
    }

    async fn pending(h: &Harness) -> RequestId {
        h.engine
            .create_pending("svc_plumbing", "cust_1", "addr_1", h.clock.now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_pending_validates_references() {
        let h = harness(&["pro_1"]);
        let id = pending(&h).await;
        assert_eq!(h.engine.get(id).await.unwrap().status, RequestStatus::Pending);

        let err = h
            .engine
            .create_pending("svc_missing", "cust_1", "addr_1", h.clock.now())
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::not_found("service", "svc_missing"));
    }

    #[tokio::test]
    async fn test_accept_sets_professional_and_clears_rejections() {
        let h = harness(&["pro_1", "pro_2"]);
        let id = pending(&h).await;

        h.engine.reject(id, "pro_2").await.unwrap();
        let outcome = h.engine.accept(id, "pro_1").await.unwrap();
        assert_eq!(outcome.professional_id, "pro_1");

        let request = h.engine.get(id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Accepted);
        assert_eq!(request.professional.as_deref(), Some("pro_1"));
        assert_eq!(h.engine.tracker.count(id).await.unwrap(), 0);
        assert_eq!(h.publisher.event_names(), vec!["RequestAccepted"]);
    }

    #[tokio::test]
    async fn test_accept_non_pending_does_not_mutate() {
        let h = harness(&["pro_1", "pro_2"]);
        let id = pending(&h).await;
        h.engine.accept(id, "pro_1").await.unwrap();
        let before = h.engine.get(id).await.unwrap();

        let err = h.engine.accept(id, "pro_2").await.unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidTransition {
                request_id: id,
                status: RequestStatus::Accepted,
                operation: "accept",
            }
        );
        assert_eq!(h.engine.get(id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_ineligible_professional_cannot_accept() {
        let h = harness(&["pro_1"]);
        h.directory.set_approval("pro_1", false).unwrap();
        let id = pending(&h).await;

        let err = h.engine.accept(id, "pro_1").await.unwrap_err();
        assert_eq!(err.kind(), "not_eligible");
        assert_eq!(h.engine.get(id).await.unwrap().status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_reject_threshold() {
        let h = harness(&["pro_1", "pro_2"]);
        let id = pending(&h).await;

        let first = h.engine.reject(id, "pro_1").await.unwrap();
        assert_eq!((first.rejections, first.eligible, first.terminal), (1, 2, None));

        // Repeat decline is idempotent
        let repeat = h.engine.reject(id, "pro_1").await.unwrap();
        assert_eq!(repeat.rejections, 1);

        let last = h.engine.reject(id, "pro_2").await.unwrap();
        assert_eq!(last.terminal, Some(RequestStatus::Rejected));

        let request = h.engine.get(id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Rejected);
        assert_eq!(request.professional, None);
        assert_eq!(h.publisher.event_names(), vec!["RequestResolved"]);
    }

    #[tokio::test]
    async fn test_single_reject_resolves_unserviceable_request() {
        let h = harness(&[]);
        h.directory
            .upsert_professional(Professional {
                id: "pro_far".to_string(),
                category: "plumbing".to_string(),
                postal_code: "999999".to_string(),
                is_approved: true,
                rating: RatingSummary::default(),
            })
            .unwrap();
        let id = pending(&h).await;

        let err = h.engine.accept(id, "pro_far").await.unwrap_err();
        assert_eq!(err.kind(), "not_eligible");

        let outcome = h.engine.reject(id, "pro_far").await.unwrap();
        assert_eq!(outcome.eligible, 0);
        assert_eq!(outcome.terminal, Some(RequestStatus::Rejected));
    }

    #[tokio::test]
    async fn test_unapproved_professional_cannot_reject() {
        let h = harness(&["pro_1"]);
        h.directory.set_approval("pro_1", false).unwrap();
        let id = pending(&h).await;

        let err = h.engine.reject(id, "pro_1").await.unwrap_err();
        assert_eq!(err.kind(), "not_eligible");
        assert_eq!(h.engine.tracker.count(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reject_publishes_single_terminal_event() {
        let h = harness(&["pro_1"]);
        let id = pending(&h).await;

        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish_request_resolved()
            .withf(move |event| {
                event.request_id == id && event.status == RequestStatus::Rejected
            })
            .times(1)
            .returning(|_| Ok(()));

        let engine = RequestEngine::new(
            h.requests.clone(),
            Arc::new(InMemoryRejectionStore::new()),
            h.directory.clone(),
            Arc::new(publisher),
        );

        let outcome = engine.reject(id, "pro_1").await.unwrap();
        assert_eq!(outcome.terminal, Some(RequestStatus::Rejected));

        let err = engine.reject(id, "pro_1").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let h = harness(&["pro_1"]);

        let id = pending(&h).await;
        let err = h
            .engine
            .cancel(id, "pro_1", ActorRole::Professional)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");

        let err = h
            .engine
            .cancel(id, "cust_other", ActorRole::Customer)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_authorized");

        let outcome = h
            .engine
            .cancel(id, "cust_1", ActorRole::Customer)
            .await
            .unwrap();
        assert_eq!(outcome.previous_status, RequestStatus::Pending);
        assert_eq!(outcome.status, RequestStatus::CanceledByCustomer);

        let id = pending(&h).await;
        h.engine.accept(id, "pro_1").await.unwrap();
        let outcome = h
            .engine
            .cancel(id, "pro_1", ActorRole::Professional)
            .await
            .unwrap();
        assert_eq!(outcome.status, RequestStatus::CanceledByProfessional);
        let request = h.engine.get(id).await.unwrap();
        assert_eq!(request.professional.as_deref(), Some("pro_1"));
    }

    #[tokio::test]
    async fn test_complete_bills_and_aggregates() {
        let h = harness(&["pro_1"]);
        let id = pending(&h).await;
        h.engine.accept(id, "pro_1").await.unwrap();
        h.clock.advance(Duration::hours(2));

        let outcome = h
            .engine
            .complete(id, "pro_1", 5, Some("  quick fix ".to_string()))
            .await
            .unwrap();
        assert_eq!(outcome.billed_amount, 200.0);

        let request = h.engine.get(id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert_eq!(request.rating, Some(5));
        assert_eq!(request.review.as_deref(), Some("quick fix"));
        assert_eq!(request.completed_at, Some(outcome.completed_at));

        let professional = h.directory.professional("pro_1").await.unwrap().unwrap();
        assert_eq!(professional.rating.average, Some(5.0));
        assert_eq!(professional.rating.completed, 1);
    }

    #[tokio::test]
    async fn test_complete_rejects_out_of_range_rating() {
        let h = harness(&["pro_1"]);
        let id = pending(&h).await;
        h.engine.accept(id, "pro_1").await.unwrap();

        for rating in [0, 6] {
            let err = h.engine.complete(id, "cust_1", rating, None).await.unwrap_err();
            assert_eq!(err.kind(), "validation");
        }
        let request = h.engine.get(id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Accepted);
        assert_eq!(request.billed_amount, None);
    }

    #[tokio::test]
    async fn test_complete_requires_party_to_request() {
        let h = harness(&["pro_1"]);
        let id = pending(&h).await;
        h.engine.accept(id, "pro_1").await.unwrap();

        let err = h.engine.complete(id, "stranger", 4, None).await.unwrap_err();
        assert_eq!(err.kind(), "not_authorized");

        let err = h
            .engine
            .complete(pending(&h).await, "cust_1", 4, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn test_review_updates_rating() {
        let h = harness(&["pro_1"]);
        let id = pending(&h).await;
        h.engine.accept(id, "pro_1").await.unwrap();
        h.engine.complete(id, "cust_1", 2, None).await.unwrap();

        let updated = h
            .engine
            .review(id, "cust_1", 4, Some("came back and fixed it".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.rating, Some(4));

        let service = h.directory.service("svc_plumbing").await.unwrap().unwrap();
        assert_eq!(service.rating.average, Some(4.0));

        let err = h.engine.review(id, "pro_1", 5, None).await.unwrap_err();
        assert_eq!(err.kind(), "not_authorized");
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_commit() {
        let h = harness(&["pro_1"]);
        let id = pending(&h).await;
        h.publisher.set_failing(true);

        h.engine.accept(id, "pro_1").await.unwrap();
        assert_eq!(h.engine.get(id).await.unwrap().status, RequestStatus::Accepted);
    }

    #[tokio::test]
    async fn test_serviceability() {
        let h = harness(&["pro_1"]);

        let report = h
            .engine
            .check_serviceability("560001", &["svc_plumbing".to_string()])
            .await
            .unwrap();
        assert!(report.all_serviceable());
        assert_eq!(report.services[0].eligible_professionals, 1);

        let report = h
            .engine
            .check_serviceability("999999", &["svc_plumbing".to_string()])
            .await
            .unwrap();
        assert_eq!(report.unserviceable(), vec!["svc_plumbing"]);

        let err = h
            .engine
            .check_serviceability("560001", &["svc_missing".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_reminders_cover_accepted_requests() {
        let h = harness(&["pro_1"]);
        let accepted = pending(&h).await;
        h.engine.accept(accepted, "pro_1").await.unwrap();
        pending(&h).await;
        h.publisher.clear_events();

        assert_eq!(h.engine.send_reminders().await.unwrap(), 1);
        assert_eq!(h.publisher.event_names(), vec!["ProfessionalReminder"]);
        assert_eq!(h.publisher.events()[0].request_id(), accepted);
    }

    #[tokio::test]
    async fn test_metrics_are_recorded() {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let h = harness(&["pro_1"]);
        let engine = h.engine.clone().with_metrics(metrics.clone());

        let id = engine
            .create_pending("svc_plumbing", "cust_1", "addr_1", h.clock.now())
            .await
            .unwrap();
        engine.accept(id, "pro_1").await.unwrap();
        let _ = engine.accept(id, "pro_1").await;

        assert_eq!(
            metrics
                .lifecycle()
                .transitions_total
                .with_label_values(&["pending", "accepted"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .lifecycle()
                .operation_errors_total
                .with_label_values(&["accept", "invalid_transition"])
                .get(),
            1
        );
    }

    /// Store that loses the assignment on the row it returns from completion
    struct DetachingRequestStore {
        inner: InMemoryRequestStore,
    }

    #[async_trait::async_trait]
    impl RequestStore for DetachingRequestStore {
        async fn insert(&self, request: ServiceRequest) -> EngineResult<()> {
            self.inner.insert(request).await
        }

        async fn get(&self, id: RequestId) -> EngineResult<Option<ServiceRequest>> {
            self.inner.get(id).await
        }

        async fn transition(
            &self,
            id: RequestId,
            expected: RequestStatus,
            change: RequestChange,
        ) -> EngineResult<ServiceRequest> {
            let completing = matches!(change, RequestChange::Complete { .. });
            let mut updated = self.inner.transition(id, expected, change).await?;
            if completing {
                updated.professional = None;
            }
            Ok(updated)
        }

        async fn list(&self, filter: RequestFilter) -> EngineResult<Vec<ServiceRequest>> {
            self.inner.list(filter).await
        }

        async fn count_by_status(
            &self,
        ) -> EngineResult<std::collections::HashMap<RequestStatus, usize>> {
            self.inner.count_by_status().await
        }
    }

    #[tokio::test]
    async fn test_completion_without_professional_is_not_published() {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let publisher = Arc::new(RecordingEventPublisher::new());
        let clock = Arc::new(ManualClock::default());
        let engine = RequestEngine::new(
            Arc::new(DetachingRequestStore {
                inner: InMemoryRequestStore::new(),
            }),
            Arc::new(InMemoryRejectionStore::new()),
            directory_with(&["pro_1"]),
            publisher.clone(),
        )
        .with_clock(clock.clone())
        .with_metrics(metrics.clone());

        let id = engine
            .create_pending("svc_plumbing", "cust_1", "addr_1", clock.now())
            .await
            .unwrap();
        engine.accept(id, "pro_1").await.unwrap();
        engine.complete(id, "cust_1", 5, None).await.unwrap();

        assert_eq!(publisher.event_names(), vec!["RequestAccepted"]);
        assert_eq!(
            metrics
                .service()
                .events_published_total
                .with_label_values(&["RequestCompleted", "error"])
                .get(),
            1
        );
    }
}
