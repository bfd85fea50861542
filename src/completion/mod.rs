//! Completion billing and rating aggregation

pub mod aggregator;
pub mod billing;

pub use aggregator::{summarize, RatingAggregator};
pub use billing::billed_amount;
