//! Marketplace-wide aggregate statistics
//!
//! The snapshot is recomputed from the request store and the directory on
//! every call; nothing is maintained incrementally.

use crate::completion::summarize;
use crate::error::EngineResult;
use crate::store::{bounded, Directory, RequestFilter, RequestStore};
use crate::types::RequestStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub customers: usize,
    pub professionals: usize,
    pub approved_professionals: usize,
    pub total_requests: usize,
    /// Request count per status name, `requested` folded into `pending`
    pub requests_by_status: BTreeMap<String, usize>,
    /// Average over all rated completed requests
    pub average_rating: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

impl StatsSnapshot {
    pub async fn compute(
        requests: &dyn RequestStore,
        directory: &dyn Directory,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> EngineResult<Self> {
        let counts = bounded(timeout, "count_by_status", requests.count_by_status()).await?;
        let population = bounded(timeout, "population", directory.population()).await?;
        let completed = bounded(
            timeout,
            "list_requests",
            requests.list(RequestFilter::with_status(RequestStatus::Completed)),
        )
        .await?;

        Ok(Self {
            customers: population.customers,
            professionals: population.professionals,
            approved_professionals: population.approved_professionals,
            total_requests: counts.values().sum(),
            requests_by_status: by_status_name(&counts),
            average_rating: summarize(&completed).average,
            computed_at: now,
        })
    }

    pub fn count(&self, status: RequestStatus) -> usize {
        self.requests_by_status
            .get(status.normalized().as_str())
            .copied()
            .unwrap_or(0)
    }
}

fn by_status_name(counts: &HashMap<RequestStatus, usize>) -> BTreeMap<String, usize> {
    let mut by_name = BTreeMap::new();
    for status in RequestStatus::ALL {
        if status == RequestStatus::Requested {
            continue;
        }
        by_name.insert(
            status.as_str().to_string(),
            counts.get(&status).copied().unwrap_or(0),
        );
    }
    by_name
}
