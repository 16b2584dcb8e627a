//! Audit trail for authorization decisions
//!
//! Every decision made by the permission manager is written here. The
//! logger is a passive sink: it holds no authorization logic and never
//! fails a caller.

mod logger;
mod record;

pub use logger::{AuditLevel, AuditLogger};
pub use record::{AuditFilter, AuditRecord, AuditResult, PermissionType};
