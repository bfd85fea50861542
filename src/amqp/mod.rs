//! AMQP integration for the dispatch service
//!
//! This module handles the broker connection and publishing of request
//! lifecycle events to the `dispatch.request_events` topic exchange.

pub mod connection;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use messages::*;
pub use publisher::{
    AmqpEventPublisher, EventPublisher, LoggingEventPublisher, PublisherConfig,
    RecordingEventPublisher,
};
