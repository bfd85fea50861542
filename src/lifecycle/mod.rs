//! Service request lifecycle
//!
//! [`state`] holds the pure transition rules; [`engine`] drives them against
//! the stores and emits events.

pub mod engine;
pub mod state;

pub use engine::RequestEngine;
pub use state::{cancel_target, next_valid_states, validate_transition};
