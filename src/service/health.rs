//! Health checks for the dispatch service
//!
//! Provides readiness and liveness probes plus a detailed component check
//! used by the `/stats` endpoint.

use crate::amqp::AmqpConnection;
use crate::lifecycle::RequestEngine;
use crate::stats::StatsSnapshot;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported as `service_dispatch_health_status`
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn merge(self, other: &HealthStatus) -> HealthStatus {
        match (&self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Everything a probe needs to look at
#[derive(Clone)]
pub struct ServiceProbe {
    pub service_name: String,
    pub engine: RequestEngine,
    pub is_running: Arc<RwLock<bool>>,
    /// `None` when events go to the log instead of a broker
    pub amqp: Option<Arc<AmqpConnection>>,
}

impl ServiceProbe {
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Marketplace stats, absent when the stores could not be read
    pub stats: Option<StatsSnapshot>,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

impl HealthCheck {
    /// Perform a full health check of the service
    pub async fn check(probe: &ServiceProbe) -> Result<Self> {
        let service_check = Self::check_service_running(probe).await;
        let (store_check, stats) = Self::check_stores(probe).await;
        let amqp_check = Self::check_amqp_health(probe);

        let status = service_check
            .status
            .clone()
            .merge(&store_check.status)
            .merge(&amqp_check.status);

        Ok(HealthCheck {
            status,
            service: probe.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks: vec![service_check, store_check, amqp_check],
            stats,
        })
    }

    /// Simple liveness check, only verifies the service is running
    pub async fn liveness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if probe.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check, verifies the service can serve lifecycle operations
    pub async fn readiness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if !probe.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let (store_check, _) = Self::check_stores(probe).await;
        Ok(store_check
            .status
            .merge(&Self::check_amqp_health(probe).status))
    }

    async fn check_service_running(probe: &ServiceProbe) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if probe.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// A stats pass touches every store, so it doubles as the store probe
    async fn check_stores(probe: &ServiceProbe) -> (ComponentCheck, Option<StatsSnapshot>) {
        let start = std::time::Instant::now();

        let (status, message, stats) = match probe.engine.stats().await {
            Ok(stats) => (HealthStatus::Healthy, None, Some(stats)),
            Err(e) if e.is_retryable() => {
                error!("Store health check failed: {}", e);
                (HealthStatus::Degraded, Some(e.to_string()), None)
            }
            Err(e) => {
                error!("Store health check failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()), None)
            }
        };

        let check = ComponentCheck {
            name: "request_store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        (check, stats)
    }

    fn check_amqp_health(probe: &ServiceProbe) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match &probe.amqp {
            Some(connection) if connection.is_open() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Degraded,
                Some("AMQP connection is closed, events are not delivered".to_string()),
            ),
            None => (
                HealthStatus::Healthy,
                Some("AMQP disabled, events are logged".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
