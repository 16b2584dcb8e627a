//! Human-in-the-loop escalation
//!
//! Permissions marked `hitl_required` need a live human approval before the
//! permission manager grants them. The broker keeps the pending requests,
//! hands them to an approver surface via `pending_requests()`, and turns
//! decisions into `PermissionGrant`s.
//!
//! ## Example
//!
//! ```rust,ignore
//! let broker = Arc::new(HitlBroker::with_timeout(Duration::from_secs(120)));
//!
//! // Operator console
//! for request in broker.pending_requests() {
//!     broker.approve(PermissionDecision::approve(&request.id, "alice"))?;
//! }
//! ```

mod broker;
mod types;

pub use broker::{
    AsyncApproval, HitlBroker, HitlProvider, DEFAULT_HITL_TIMEOUT, ONE_TIME_GRANT_TTL_SECS,
};
pub use types::{PermissionDecision, PermissionRequest, RiskLevel};
