//! Matching of professionals to service requests
//!
//! Eligibility decides who may act on a request; the rejection tracker
//! records who has declined it.

pub mod eligibility;
pub mod rejections;

pub use eligibility::{check_eligibility, EligibilityResolver, MatchContext};
pub use rejections::{InMemoryRejectionStore, RejectionStore, RejectionTracker};
