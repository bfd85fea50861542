//! Main application state and service coordination
//!
//! `AppState` wires the stores, the event publisher and the lifecycle engine
//! together and owns the background sweep, reminder and metrics tasks.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::publisher::{
    AmqpEventPublisher, EventPublisher, LoggingEventPublisher, PublisherConfig,
};
use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::lifecycle::RequestEngine;
use crate::matching::InMemoryRejectionStore;
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::service::health::{HealthCheck, ServiceProbe};
use crate::store::{DirectorySeed, InMemoryDirectory, InMemoryRequestStore};
use crate::sweeper::{ExpirySweeper, ReminderTask};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    /// Lifecycle engine shared with every caller
    engine: RequestEngine,

    /// Broker connection, absent when AMQP is disabled
    amqp_connection: Option<Arc<AmqpConnection>>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    background_tasks: Vec<JoinHandle<()>>,

    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} dispatch service", config.service.name);
        info!(
            "Configuration: amqp_enabled={}, expiry_horizon={}h, sweep_interval={}s",
            config.amqp.enabled,
            config.engine.expiry_horizon_hours,
            config.engine.sweep_interval_seconds
        );

        let collector = Self::initialize_collector()?;
        let amqp_connection = Self::initialize_amqp(&config).await?;
        let publisher = Self::initialize_publisher(&config, amqp_connection.as_deref()).await?;
        let directory = Self::initialize_directory(&config)?;

        let engine = RequestEngine::new(
            Arc::new(InMemoryRequestStore::new()),
            Arc::new(InMemoryRejectionStore::new()),
            directory,
            publisher,
        )
        .with_config(config.engine.clone())
        .with_metrics(collector.clone());

        let is_running = Arc::new(RwLock::new(false));
        let probe = ServiceProbe {
            service_name: config.service.name.clone(),
            engine: engine.clone(),
            is_running: is_running.clone(),
            amqp: amqp_connection.clone(),
        };
        let metrics_service = Self::initialize_metrics(&config, collector, probe);

        Ok(Self {
            config,
            engine,
            amqp_connection,
            metrics_service,
            background_tasks: Vec::new(),
            is_running,
        })
    }

    /// Start the health server and all background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting {} dispatch service", self.config.service.name);

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;
        self.start_background_tasks().await?;

        info!("✅ Dispatch service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of dispatch service");

        *self.is_running.write().await = false;

        self.stop_background_tasks().await;

        info!("Stopping metrics service...");
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        // The health probe keeps its own handle; the socket closes on last drop
        if self.amqp_connection.take().is_some() {
            info!("Released AMQP connection");
        }

        let final_stats =
            self.engine
                .stats()
                .await
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;

        info!(
            "Final statistics: {} requests, by status {:?}",
            final_stats.total_requests, final_stats.requests_by_status
        );
        info!("✅ Dispatch service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Lifecycle engine for request operations
    pub fn engine(&self) -> RequestEngine {
        self.engine.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    /// Probe over this state for health checks
    pub fn probe(&self) -> ServiceProbe {
        ServiceProbe {
            service_name: self.config.service.name.clone(),
            engine: self.engine.clone(),
            is_running: self.is_running.clone(),
            amqp: self.amqp_connection.clone(),
        }
    }

    fn initialize_collector() -> Result<Arc<MetricsCollector>, ServiceError> {
        MetricsCollector::new()
            .map(Arc::new)
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            })
    }

    fn initialize_metrics(
        config: &AppConfig,
        collector: Arc<MetricsCollector>,
        probe: ServiceProbe,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.metrics_port
        );

        let health_config = HealthServerConfig {
            port: config.service.metrics_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(HealthServer::new(health_config, collector.clone()).with_probe(probe));

        Arc::new(MetricsService::new(collector, health_server))
    }

    /// Connect to the broker when AMQP is enabled
    async fn initialize_amqp(
        config: &AppConfig,
    ) -> Result<Option<Arc<AmqpConnection>>, ServiceError> {
        if !config.amqp.enabled {
            info!("AMQP disabled - lifecycle events will be logged only");
            return Ok(None);
        }

        let amqp_config = AmqpConfig::from_settings(&config.amqp).map_err(|e| {
            ServiceError::AmqpConnectionFailed {
                message: format!("Failed to parse AMQP URL: {}", e),
            }
        })?;
        info!("Connecting to AMQP broker: {}", amqp_config.endpoint());

        let connection = AmqpConnection::new(amqp_config).await.map_err(|e| {
            ServiceError::AmqpConnectionFailed {
                message: format!("Failed to connect to AMQP: {}", e),
            }
        })?;

        Ok(Some(Arc::new(connection)))
    }

    async fn initialize_publisher(
        config: &AppConfig,
        connection: Option<&AmqpConnection>,
    ) -> Result<Arc<dyn EventPublisher>, ServiceError> {
        let Some(connection) = connection else {
            return Ok(Arc::new(LoggingEventPublisher));
        };

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open AMQP channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.exchange_name.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
        };

        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Ok(Arc::new(publisher))
    }

    /// Build the directory, loading the seed file if one is configured
    fn initialize_directory(config: &AppConfig) -> Result<Arc<InMemoryDirectory>, ServiceError> {
        let Some(path) = &config.service.directory_seed_path else {
            warn!("No directory seed configured - starting with an empty directory");
            return Ok(Arc::new(InMemoryDirectory::new()));
        };

        info!("Loading directory seed from {}", path.display());
        let seed = DirectorySeed::from_file(path).map_err(|e| ServiceError::ConfigurationError {
            message: format!("{:#}", e),
        })?;

        info!(
            "Directory seed: {} services, {} professionals, {} addresses, {} customers",
            seed.services.len(),
            seed.professionals.len(),
            seed.addresses.len(),
            seed.customers.len()
        );

        seed.into_directory()
            .map(Arc::new)
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to load directory seed: {}", e),
            })
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.metrics_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                tracing::error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    /// Start the sweep, reminder and health metrics tasks
    async fn start_background_tasks(&mut self) -> Result<(), ServiceError> {
        info!("Starting background maintenance tasks...");

        let sweep_task = ExpirySweeper::new(self.engine.clone()).start(self.is_running.clone());
        let reminder_task = ReminderTask::new(self.engine.clone()).start(self.is_running.clone());

        info!("Starting health metrics task (60s interval)...");
        let health_metrics_task = {
            let metrics_collector = self.metrics_service.collector();
            let probe = self.probe();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let start_time = tokio::time::Instant::now();
                info!("Health metrics task started");

                while probe.is_running().await {
                    interval.tick().await;

                    let uptime_seconds = start_time.elapsed().as_secs() as i64;
                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(uptime_seconds);

                    match HealthCheck::check(&probe).await {
                        Ok(health) => {
                            metrics_collector.update_health_status(health.status.as_gauge());
                            for check in &health.checks {
                                metrics_collector.update_component_health(
                                    &check.name,
                                    check.status != crate::service::HealthStatus::Unhealthy,
                                );
                            }
                            debug!(
                                "Updated service health metrics - status: {}, uptime: {}s",
                                health.status, uptime_seconds
                            );
                        }
                        Err(e) => warn!("Health metrics update failed: {}", e),
                    }
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(sweep_task);
        self.background_tasks.push(reminder_task);
        self.background_tasks.push(health_metrics_task);

        info!("3 background maintenance tasks started successfully");
        Ok(())
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}
