//! Periodic expiry sweep over stale pending requests

use crate::error::{EngineError, EngineResult};
use crate::lifecycle::RequestEngine;
use crate::types::{RequestId, RequestStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Per-pass tally of what the sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Stale pending rows found
    pub scanned: usize,
    pub rejected: usize,
    pub expired: usize,
    /// Rows already resolved by a concurrent operation
    pub skipped: usize,
    /// Rows left pending after exhausting retries
    pub failed: usize,
}

impl SweepReport {
    pub fn resolved_count(&self) -> usize {
        self.rejected + self.expired
    }
}

/// Resolves pending requests older than the expiry horizon
#[derive(Clone)]
pub struct ExpirySweeper {
    engine: RequestEngine,
    max_retries: u32,
    retry_delay: Duration,
}

impl ExpirySweeper {
    pub fn new(engine: RequestEngine) -> Self {
        let max_retries = engine.settings().sweep_max_retries;
        let retry_delay = engine.settings().sweep_retry_delay();
        Self {
            engine,
            max_retries,
            retry_delay,
        }
    }

    /// Run a single pass as of `now`
    ///
    /// A failing row never aborts the pass; it is retried and then counted
    /// as failed so the next pass picks it up again.
    pub async fn run_once(&self, now: DateTime<Utc>) -> EngineResult<SweepReport> {
        let started = Instant::now();
        let stale = self.engine.stale_pending(now).await?;
        let mut report = SweepReport {
            scanned: stale.len(),
            ..SweepReport::default()
        };

        for request in stale {
            match self.resolve_with_retry(request.id).await {
                Ok(Some(RequestStatus::Rejected)) => report.rejected += 1,
                Ok(Some(_)) => report.expired += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!("Sweep gave up on request {}: {}", request.id, e);
                    report.failed += 1;
                }
            }
        }

        if report.scanned > 0 {
            info!(
                "Expiry sweep resolved {} of {} stale requests ({} rejected, {} expired, {} skipped, {} failed)",
                report.resolved_count(),
                report.scanned,
                report.rejected,
                report.expired,
                report.skipped,
                report.failed
            );
        } else {
            debug!("Expiry sweep found no stale requests");
        }

        if let Some(metrics) = self.engine.metrics() {
            metrics.record_sweep(&report, started.elapsed());
        }
        Ok(report)
    }

    async fn resolve_with_retry(&self, request_id: RequestId) -> EngineResult<Option<RequestStatus>> {
        let mut attempt = 0;
        let mut delay = self.retry_delay;

        loop {
            match self.engine.resolve_stale(request_id).await {
                Ok(outcome) => return Ok(outcome),
                Err(EngineError::InvalidTransition { .. }) => return Ok(None),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "Sweep attempt {} failed for request {}: {}. Retrying in {:?}",
                        attempt, request_id, e, delay
                    );
                    if let Some(metrics) = self.engine.metrics() {
                        metrics.record_store_retry();
                    }
                    sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Spawn the periodic sweep loop, running until `is_running` goes false
    pub fn start(self, is_running: Arc<RwLock<bool>>) -> JoinHandle<()> {
        let sweep_interval = self.engine.settings().sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            info!(
                "Expiry sweep task started ({}s interval)",
                sweep_interval.as_secs()
            );

            while *is_running.read().await {
                interval.tick().await;

                if let Err(e) = self.run_once(self.engine.now()).await {
                    warn!("Expiry sweep failed: {}", e);
                }
            }

            info!("Expiry sweep task stopped");
        })
    }
}
