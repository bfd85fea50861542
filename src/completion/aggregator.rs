//! Rating aggregation for professionals and services
//!
//! Summaries are always recomputed from every completed request referencing
//! the professional or service, so running the aggregator twice gives the
//! same result and a failed run can simply be repeated.

use crate::error::EngineResult;
use crate::store::{bounded, Directory, RequestFilter, RequestStore};
use crate::types::{RatingSummary, ServiceRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Summarize a set of completed requests
pub fn summarize(completed: &[ServiceRequest]) -> RatingSummary {
    let ratings: Vec<f64> = completed
        .iter()
        .filter_map(|request| request.rating.map(f64::from))
        .collect();

    let average = if ratings.is_empty() {
        None
    } else {
        Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
    };

    RatingSummary {
        average,
        completed: completed.len() as u64,
    }
}

/// Recomputes rating summaries and writes them back to the directory
#[derive(Clone)]
pub struct RatingAggregator {
    requests: Arc<dyn RequestStore>,
    directory: Arc<dyn Directory>,
    timeout: Duration,
}

impl RatingAggregator {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        directory: Arc<dyn Directory>,
        timeout: Duration,
    ) -> Self {
        Self {
            requests,
            directory,
            timeout,
        }
    }

    pub async fn recompute_professional(&self, professional_id: &str) -> EngineResult<RatingSummary> {
        let completed = bounded(
            self.timeout,
            "list_requests",
            self.requests
                .list(RequestFilter::completed_by_professional(professional_id)),
        )
        .await?;
        let summary = summarize(&completed);

        bounded(
            self.timeout,
            "record_professional_rating",
            self.directory
                .record_professional_rating(professional_id, summary.clone()),
        )
        .await?;

        debug!(
            "Professional {} rating recomputed: {:?} over {} completed",
            professional_id, summary.average, summary.completed
        );
        Ok(summary)
    }

    pub async fn recompute_service(&self, service_id: &str) -> EngineResult<RatingSummary> {
        let completed = bounded(
            self.timeout,
            "list_requests",
            self.requests
                .list(RequestFilter::completed_for_service(service_id)),
        )
        .await?;
        let summary = summarize(&completed);

        bounded(
            self.timeout,
            "record_service_rating",
            self.directory
                .record_service_rating(service_id, summary.clone()),
        )
        .await?;

        debug!(
            "Service {} rating recomputed: {:?} over {} completed",
            service_id, summary.average, summary.completed
        );
        Ok(summary)
    }

    /// Recompute both summaries touched by a completed request
    pub async fn recompute_for(&self, request: &ServiceRequest) -> EngineResult<()> {
        if let Some(professional_id) = &request.professional {
            self.recompute_professional(professional_id).await?;
        }
        self.recompute_service(&request.service_id).await?;
        Ok(())
    }
}
