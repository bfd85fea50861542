//! Service layer for the dispatch service
//!
//! Application state, health probes and background task management for the
//! production binary.

pub mod app;
pub mod health;

pub use app::AppState;
pub use health::{HealthCheck, HealthStatus, ServiceProbe};
