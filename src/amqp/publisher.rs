//! Lifecycle event publishers

use crate::amqp::messages::{routing_key, MessageEnvelope};
use crate::error::{Result, ServiceError};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing request lifecycle events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a RequestAccepted event
    async fn publish_request_accepted(&self, event: RequestAccepted) -> Result<()>;

    /// Publish a RequestResolved event (rejected or expired)
    async fn publish_request_resolved(&self, event: RequestResolved) -> Result<()>;

    /// Publish a RequestCanceled event
    async fn publish_request_canceled(&self, event: RequestCanceled) -> Result<()>;

    /// Publish a RequestCompleted event
    async fn publish_request_completed(&self, event: RequestCompleted) -> Result<()>;

    /// Publish a ProfessionalReminder event
    async fn publish_professional_reminder(&self, event: ProfessionalReminder) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: crate::amqp::messages::REQUEST_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange, "topic");
        self.channel.exchange_declare(args).await.map_err(|e| {
            ServiceError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare exchange {}: {}",
                    self.config.exchange, e
                ),
            }
        })?;

        info!("Declared AMQP exchange {}", self.config.exchange);
        Ok(())
    }

    /// Publish an event with retry logic
    async fn publish_event(&self, event: LifecycleEvent) -> Result<()> {
        let key = routing_key(&event);
        let envelope = MessageEnvelope::new(event, key);
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(&envelope).await {
                Ok(_) => {
                    debug!(
                        "Published {} for request {} as message {}",
                        envelope.payload.name(),
                        envelope.payload.request_id(),
                        envelope.correlation_id
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish(&self, envelope: &MessageEnvelope<LifecycleEvent>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| ServiceError::PublishFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_request_accepted(&self, event: RequestAccepted) -> Result<()> {
        self.publish_event(LifecycleEvent::RequestAccepted(event))
            .await
    }

    async fn publish_request_resolved(&self, event: RequestResolved) -> Result<()> {
        self.publish_event(LifecycleEvent::RequestResolved(event))
            .await
    }

    async fn publish_request_canceled(&self, event: RequestCanceled) -> Result<()> {
        self.publish_event(LifecycleEvent::RequestCanceled(event))
            .await
    }

    async fn publish_request_completed(&self, event: RequestCompleted) -> Result<()> {
        self.publish_event(LifecycleEvent::RequestCompleted(event))
            .await
    }

    async fn publish_professional_reminder(&self, event: ProfessionalReminder) -> Result<()> {
        self.publish_event(LifecycleEvent::ProfessionalReminder(event))
            .await
    }
}

/// Publisher that only writes events to the log, used when AMQP is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventPublisher;

impl LoggingEventPublisher {
    fn log(&self, event: LifecycleEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        info!(
            routing_key = routing_key(&event),
            "Lifecycle event {}: {}",
            event.name(),
            payload
        );
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish_request_accepted(&self, event: RequestAccepted) -> Result<()> {
        self.log(LifecycleEvent::RequestAccepted(event))
    }

    async fn publish_request_resolved(&self, event: RequestResolved) -> Result<()> {
        self.log(LifecycleEvent::RequestResolved(event))
    }

    async fn publish_request_canceled(&self, event: RequestCanceled) -> Result<()> {
        self.log(LifecycleEvent::RequestCanceled(event))
    }

    async fn publish_request_completed(&self, event: RequestCompleted) -> Result<()> {
        self.log(LifecycleEvent::RequestCompleted(event))
    }

    async fn publish_professional_reminder(&self, event: ProfessionalReminder) -> Result<()> {
        self.log(LifecycleEvent::ProfessionalReminder(event))
    }
}

/// In-process publisher that records every event, for tests and dry runs
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    published_events: Mutex<Vec<LifecycleEvent>>,
    fail_publishes: Mutex<bool>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail without recording
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut fail) = self.fail_publishes.lock() {
            *fail = failing;
        }
    }

    /// All recorded events in publish order
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Names of all recorded events in publish order
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events().iter().map(LifecycleEvent::name).collect()
    }

    /// Recorded events concerning one request
    pub fn events_for(&self, request_id: RequestId) -> Vec<LifecycleEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.request_id() == request_id)
            .collect()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }

    fn record(&self, event: LifecycleEvent) -> Result<()> {
        let failing = self.fail_publishes.lock().map(|f| *f).unwrap_or(false);
        if failing {
            return Err(ServiceError::PublishFailed {
                message: format!("{} rejected by recording publisher", event.name()),
            }
            .into());
        }

        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish_request_accepted(&self, event: RequestAccepted) -> Result<()> {
        self.record(LifecycleEvent::RequestAccepted(event))
    }

    async fn publish_request_resolved(&self, event: RequestResolved) -> Result<()> {
        self.record(LifecycleEvent::RequestResolved(event))
    }

    async fn publish_request_canceled(&self, event: RequestCanceled) -> Result<()> {
        self.record(LifecycleEvent::RequestCanceled(event))
    }

    async fn publish_request_completed(&self, event: RequestCompleted) -> Result<()> {
        self.record(LifecycleEvent::RequestCompleted(event))
    }

    async fn publish_professional_reminder(&self, event: ProfessionalReminder) -> Result<()> {
        self.record(LifecycleEvent::ProfessionalReminder(event))
    }
}
