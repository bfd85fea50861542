//! Billed amount for a completed request

use crate::utils::{elapsed_hours, round_to_cents};
use chrono::{DateTime, Utc};

/// Minimum billable duration in hours; shorter jobs pay the base price
pub const MINIMUM_BILLABLE_HOURS: f64 = 1.0;

/// Compute the billed amount from the request and completion instants.
///
/// Jobs under one hour are billed at `base_price`. Longer jobs are billed
/// `base_price` per hour, pro rata, rounded to cents. A completion instant
/// before the request instant counts as a short job.
pub fn billed_amount(
    base_price: f64,
    requested_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
) -> f64 {
    let hours = elapsed_hours(requested_at, completed_at);
    if hours < MINIMUM_BILLABLE_HOURS {
        round_to_cents(base_price)
    } else {
        round_to_cents(base_price * hours)
    }
}
