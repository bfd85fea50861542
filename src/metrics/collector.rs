//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the service-dispatch engine
//! using Prometheus metrics.

use crate::sweeper::SweepReport;
use crate::types::RequestStatus;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the dispatch service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Request lifecycle metrics
    lifecycle_metrics: LifecycleMetrics,

    /// Expiry sweep and reminder metrics
    sweep_metrics: SweepMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Lifecycle events handed to the publisher
    pub events_published_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Request lifecycle metrics
#[derive(Clone)]
pub struct LifecycleMetrics {
    /// Committed status transitions
    pub transitions_total: IntCounterVec,

    /// Failed engine operations by error kind
    pub operation_errors_total: IntCounterVec,

    /// Newly recorded rejections
    pub rejections_total: IntCounter,

    /// Post-commit side effects that failed
    pub side_effect_failures_total: IntCounterVec,

    /// Billed amount per completed request
    pub billed_amount: Histogram,

    /// Requests per status as of the last stats snapshot
    pub requests_by_status: IntGaugeVec,
}

/// Expiry sweep and reminder metrics
#[derive(Clone)]
pub struct SweepMetrics {
    /// Completed sweep passes
    pub sweeps_total: IntCounter,

    /// Swept rows by outcome
    pub swept_rows_total: IntCounterVec,

    /// Wall time of a sweep pass
    pub sweep_duration_seconds: Histogram,

    /// Unix time of the last finished sweep
    pub last_sweep_timestamp: IntGauge,

    /// Reminders published
    pub reminders_sent_total: IntCounter,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Engine operation durations
    pub operation_duration: HistogramVec,

    /// Store calls retried by the sweeper
    pub store_retries_total: IntCounter,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let lifecycle_metrics = LifecycleMetrics::new(&registry)?;
        let sweep_metrics = SweepMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            lifecycle_metrics,
            sweep_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get lifecycle metrics
    pub fn lifecycle(&self) -> &LifecycleMetrics {
        &self.lifecycle_metrics
    }

    /// Get sweep metrics
    pub fn sweep(&self) -> &SweepMetrics {
        &self.sweep_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a committed status transition
    pub fn record_transition(&self, from: RequestStatus, to: RequestStatus) {
        self.lifecycle_metrics
            .transitions_total
            .with_label_values(&[from.normalized().as_str(), to.as_str()])
            .inc();
    }

    /// Record the outcome and duration of an engine operation
    pub fn record_operation(&self, operation: &str, duration: Duration, error_kind: Option<&str>) {
        self.performance_metrics
            .operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());

        if let Some(kind) = error_kind {
            self.lifecycle_metrics
                .operation_errors_total
                .with_label_values(&[operation, kind])
                .inc();
        }
    }

    pub fn record_rejection(&self) {
        self.lifecycle_metrics.rejections_total.inc();
    }

    pub fn record_billed_amount(&self, amount: f64) {
        self.lifecycle_metrics.billed_amount.observe(amount);
    }

    /// Record a post-commit side effect failure
    pub fn record_side_effect_failure(&self, effect: &str) {
        self.lifecycle_metrics
            .side_effect_failures_total
            .with_label_values(&[effect])
            .inc();
    }

    /// Record an event publish attempt
    pub fn record_event_published(&self, event: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.service_metrics
            .events_published_total
            .with_label_values(&[event, status])
            .inc();
    }

    /// Record a finished sweep pass
    pub fn record_sweep(&self, report: &SweepReport, duration: Duration) {
        self.sweep_metrics.sweeps_total.inc();
        for (outcome, count) in [
            ("rejected", report.rejected),
            ("expired", report.expired),
            ("skipped", report.skipped),
            ("failed", report.failed),
        ] {
            self.sweep_metrics
                .swept_rows_total
                .with_label_values(&[outcome])
                .inc_by(count as u64);
        }
        self.sweep_metrics
            .sweep_duration_seconds
            .observe(duration.as_secs_f64());
        self.sweep_metrics
            .last_sweep_timestamp
            .set(chrono::Utc::now().timestamp());
    }

    pub fn record_store_retry(&self) {
        self.performance_metrics.store_retries_total.inc();
    }

    pub fn record_reminders(&self, sent: usize) {
        self.sweep_metrics.reminders_sent_total.inc_by(sent as u64);
    }

    /// Update the per-status request gauges
    pub fn update_status_counts(&self, counts: &HashMap<RequestStatus, usize>) {
        for status in RequestStatus::ALL {
            if status == RequestStatus::Requested {
                continue;
            }
            let count = counts.get(&status).copied().unwrap_or(0);
            self.lifecycle_metrics
                .requests_by_status
                .with_label_values(&[status.as_str()])
                .set(count as i64);
        }
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("service_dispatch_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "service_dispatch_events_published_total",
                "Lifecycle events handed to the publisher",
            ),
            &["event", "status"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        let health_status = IntGauge::new(
            "service_dispatch_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new(
                "service_dispatch_component_health",
                "Component health status",
            ),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            events_published_total,
            health_status,
            component_health,
        })
    }
}

impl LifecycleMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let transitions_total = IntCounterVec::new(
            Opts::new(
                "service_dispatch_transitions_total",
                "Committed request status transitions",
            ),
            &["from", "to"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let operation_errors_total = IntCounterVec::new(
            Opts::new(
                "service_dispatch_operation_errors_total",
                "Failed engine operations",
            ),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(operation_errors_total.clone()))?;

        let rejections_total = IntCounter::new(
            "service_dispatch_rejections_total",
            "Newly recorded professional rejections",
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let side_effect_failures_total = IntCounterVec::new(
            Opts::new(
                "service_dispatch_side_effect_failures_total",
                "Post-commit side effects that failed",
            ),
            &["effect"],
        )?;
        registry.register(Box::new(side_effect_failures_total.clone()))?;

        let billed_amount = Histogram::with_opts(
            HistogramOpts::new(
                "service_dispatch_billed_amount",
                "Billed amount per completed request",
            )
            .buckets(vec![
                50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
            ]),
        )?;
        registry.register(Box::new(billed_amount.clone()))?;

        let requests_by_status = IntGaugeVec::new(
            Opts::new(
                "service_dispatch_requests_by_status",
                "Requests per status at the last stats snapshot",
            ),
            &["status"],
        )?;
        registry.register(Box::new(requests_by_status.clone()))?;

        Ok(Self {
            transitions_total,
            operation_errors_total,
            rejections_total,
            side_effect_failures_total,
            billed_amount,
            requests_by_status,
        })
    }
}

impl SweepMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let sweeps_total =
            IntCounter::new("service_dispatch_sweeps_total", "Completed expiry sweeps")?;
        registry.register(Box::new(sweeps_total.clone()))?;

        let swept_rows_total = IntCounterVec::new(
            Opts::new(
                "service_dispatch_swept_rows_total",
                "Stale pending requests handled by the sweep",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(swept_rows_total.clone()))?;

        let sweep_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "service_dispatch_sweep_duration_seconds",
                "Expiry sweep duration",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        )?;
        registry.register(Box::new(sweep_duration_seconds.clone()))?;

        let last_sweep_timestamp = IntGauge::new(
            "service_dispatch_last_sweep_timestamp",
            "Unix time of the last finished sweep",
        )?;
        registry.register(Box::new(last_sweep_timestamp.clone()))?;

        let reminders_sent_total = IntCounter::new(
            "service_dispatch_reminders_sent_total",
            "Professional reminders published",
        )?;
        registry.register(Box::new(reminders_sent_total.clone()))?;

        Ok(Self {
            sweeps_total,
            swept_rows_total,
            sweep_duration_seconds,
            last_sweep_timestamp,
            reminders_sent_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "service_dispatch_operation_duration_seconds",
                "Engine operation duration",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let store_retries_total = IntCounter::new(
            "service_dispatch_store_retries_total",
            "Store calls retried by the sweeper",
        )?;
        registry.register(Box::new(store_retries_total.clone()))?;

        Ok(Self {
            operation_duration,
            store_retries_total,
        })
    }
}
