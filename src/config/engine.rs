//! Lifecycle engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and validation knobs for the request lifecycle engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Age after which an untouched pending request is swept
    pub expiry_horizon_hours: u64,
    /// Interval between expiry sweeps
    pub sweep_interval_seconds: u64,
    /// Interval between professional reminder passes
    pub reminder_interval_seconds: u64,
    /// Upper bound for any single store call
    pub store_timeout_ms: u64,
    /// Retries per row when the sweep hits a store failure
    pub sweep_max_retries: u32,
    /// Initial backoff between sweep retries
    pub sweep_retry_delay_ms: u64,
    /// Lowest accepted rating
    pub min_rating: u8,
    /// Highest accepted rating
    pub max_rating: u8,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            expiry_horizon_hours: 24,
            sweep_interval_seconds: 12 * 60 * 60,
            reminder_interval_seconds: 24 * 60 * 60,
            store_timeout_ms: 2000,
            sweep_max_retries: 3,
            sweep_retry_delay_ms: 500,
            min_rating: 1,
            max_rating: 5,
        }
    }
}

impl EngineSettings {
    pub fn expiry_horizon(&self) -> chrono::Duration {
        chrono::Duration::hours(self.expiry_horizon_hours as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(self.reminder_interval_seconds)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn sweep_retry_delay(&self) -> Duration {
        Duration::from_millis(self.sweep_retry_delay_ms)
    }

    pub fn rating_in_range(&self, rating: u8) -> bool {
        (self.min_rating..=self.max_rating).contains(&rating)
    }
}
