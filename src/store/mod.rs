//! Persistence seams for the lifecycle engine
//!
//! Every store call made by the engine is wrapped in [`bounded`] so a stalled
//! backend surfaces as `StoreTimeout` instead of hanging an operation.

pub mod directory;
pub mod requests;
pub mod seed;

pub use directory::{Directory, InMemoryDirectory, Population};
pub use requests::{InMemoryRequestStore, RequestChange, RequestFilter, RequestStore};
pub use seed::DirectorySeed;

use crate::error::{EngineError, EngineResult};
use std::future::Future;
use std::time::Duration;

/// Run a store future with an upper bound on its duration
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::StoreTimeout {
            operation,
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}
