//! Policy error types

use std::fmt;

use thiserror::Error;

/// Why an authorization request was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// No declared permission covers the request
    NotDeclared,
    /// The path contained a `..` segment
    PathTraversal,
    /// Binary matched but arguments or environment did not
    ArgumentsRejected,
    /// The permission needs a human approval and none can be obtained
    HitlRequired,
    /// A tool asked for more than its host agent declares
    ExceedsAgentPermissions,
    /// A human approver said no
    DeniedByApprover(String),
    /// Tool execution attempted before a permission manager was installed
    Unmanaged,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::NotDeclared => write!(f, "not declared"),
            DenialReason::PathTraversal => write!(f, "path traversal detected"),
            DenialReason::ArgumentsRejected => write!(f, "arguments rejected"),
            DenialReason::HitlRequired => write!(f, "hitl approval required"),
            DenialReason::ExceedsAgentPermissions => write!(f, "exceeds agent permissions"),
            DenialReason::DeniedByApprover(reason) => write!(f, "denied by approver: {}", reason),
            DenialReason::Unmanaged => write!(f, "no permission manager attached"),
        }
    }
}

/// A structured authorization denial
///
/// `descriptor` names the action and resource that triggered the denial
/// (for example `fs:read /etc/passwd`), so an operator can decide whether
/// to widen the manifest or approve a one-time exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Action and resource that were refused
    pub descriptor: String,
    /// Why it was refused
    pub reason: DenialReason,
}

impl Denial {
    /// Create a new denial
    pub fn new(descriptor: impl Into<String>, reason: DenialReason) -> Self {
        Self {
            descriptor: descriptor.into(),
            reason,
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.descriptor, self.reason)
    }
}

/// Errors that can occur in the policy subsystem
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Malformed manifest or permission set
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Authorization denied
    #[error("Permission denied: {0}")]
    Denied(Denial),

    /// Nobody answered a HITL request in time
    #[error("HITL approval timed out for {action}")]
    HitlTimeout {
        /// The action that was waiting for approval
        action: String,
    },

    /// The caller's execution context was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Approve/deny for an id that is not pending
    #[error("Unknown permission request: {0}")]
    UnknownRequest(String),

    /// Sandbox binary missing, unresponsive or unrecognised
    #[error("Sandbox unavailable: {0}")]
    Sandbox(String),

    /// Tool failed after it was authorized
    #[error("Tool error: {0}")]
    Tool(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PolicyError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        PolicyError::Validation(msg.into())
    }

    /// Create a denial error
    pub fn denied(descriptor: impl Into<String>, reason: DenialReason) -> Self {
        PolicyError::Denied(Denial::new(descriptor, reason))
    }

    /// Create a sandbox infrastructure error
    pub fn sandbox(msg: impl Into<String>) -> Self {
        PolicyError::Sandbox(msg.into())
    }

    /// The structured denial, if this is one
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            PolicyError::Denied(denial) => Some(denial),
            _ => None,
        }
    }

    /// Whether this is an authorization denial
    pub fn is_denial(&self) -> bool {
        matches!(self, PolicyError::Denied(_))
    }

    /// Whether this is a HITL timeout or cancellation
    ///
    /// Callers may retry these later; denials should not be retried.
    pub fn is_escalation_failure(&self) -> bool {
        matches!(self, PolicyError::HitlTimeout { .. } | PolicyError::Cancelled)
    }
}

/// Result type alias for policy operations
pub type PolicyResult<T> = Result<T, PolicyError>;
