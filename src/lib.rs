//! Service Dispatch - request lifecycle and matching engine for a
//! home-services marketplace
//!
//! This crate drives service requests from booking through assignment,
//! completion or termination, tracks professional rejections, expires stale
//! requests and publishes lifecycle events over AMQP.

pub mod amqp;
pub mod clock;
pub mod completion;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod matching;
pub mod metrics;
pub mod service;
pub mod stats;
pub mod store;
pub mod sweeper;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{EngineError, EngineResult, Result, ServiceError};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use clock::{Clock, ManualClock, SystemClock};
pub use lifecycle::RequestEngine;
pub use stats::StatsSnapshot;
pub use sweeper::SweepReport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
