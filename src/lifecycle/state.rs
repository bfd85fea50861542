//! Request status transition rules
//!
//! ```text
//!   pending ──accept──> accepted ──complete──> completed ──review──> completed
//!      │                   │
//!      ├─reject/sweep─> rejected
//!      ├─sweep────────> expired
//!      └─cancel───────> canceled-by-customer <──cancel── accepted
//!                       canceled-by-professional <──cancel── accepted
//! ```
//!
//! `requested` is handled exactly like `pending`. These are pure rules; the
//! store enforces them atomically through its conditional transition.

use crate::types::{ActorRole, RequestStatus};

/// Check whether `from -> to` is a legal engine transition
pub fn validate_transition(from: RequestStatus, to: RequestStatus) -> Result<(), String> {
    use RequestStatus::*;

    match (from.normalized(), to) {
        (Pending, Accepted)
        | (Pending, Rejected)
        | (Pending, Expired)
        | (Pending, CanceledByCustomer)
        | (Accepted, Completed)
        | (Accepted, CanceledByCustomer)
        | (Accepted, CanceledByProfessional) => Ok(()),

        // Review rewrites the rating of a completed request in place
        (Completed, Completed) => Ok(()),

        (current, _) if current.is_terminal() => {
            Err(format!("Cannot transition from terminal status {}", current))
        }

        (current, next) => Err(format!(
            "Invalid status transition: {} -> {}",
            current, next
        )),
    }
}

/// Statuses reachable from `from` in one step
pub fn next_valid_states(from: RequestStatus) -> Vec<RequestStatus> {
    use RequestStatus::*;

    match from.normalized() {
        Pending => vec![Accepted, Rejected, Expired, CanceledByCustomer],
        Accepted => vec![Completed, CanceledByCustomer, CanceledByProfessional],
        Completed => vec![Completed],
        _ => Vec::new(),
    }
}

/// Target of a cancellation by `role` from `from`, `None` if not allowed
pub fn cancel_target(from: RequestStatus, role: ActorRole) -> Option<RequestStatus> {
    match (from.normalized(), role) {
        (RequestStatus::Pending, ActorRole::Customer)
        | (RequestStatus::Accepted, ActorRole::Customer) => Some(RequestStatus::CanceledByCustomer),
        (RequestStatus::Accepted, ActorRole::Professional) => {
            Some(RequestStatus::CanceledByProfessional)
        }
        _ => None,
    }
}
