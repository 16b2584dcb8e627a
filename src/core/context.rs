//! Auth context - per-call identity and cancellation passed to every check

use std::fmt;

use tokio_util::sync::CancellationToken;

/// Context attached to every authorization call
///
/// Carries the agent identity, a correlation id that ties together all audit
/// records produced by one logical operation, and the cancellation signal of
/// the caller's execution context. HITL waits race against `cancel`.
#[derive(Clone)]
pub struct AuthContext {
    /// Agent on whose behalf the action runs
    pub agent_id: String,

    /// Correlation id written to audit records
    pub correlation_id: String,

    /// Cancelled when the caller gives up
    pub cancel: CancellationToken,
}

impl AuthContext {
    /// Create a context with a fresh correlation id and cancellation token
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an explicit correlation id
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Tie this context to an existing cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Derive a context whose token is cancelled when this one is
    pub fn child(&self) -> Self {
        Self {
            agent_id: self.agent_id.clone(),
            correlation_id: self.correlation_id.clone(),
            cancel: self.cancel.child_token(),
        }
    }

    /// Whether the caller already gave up
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("agent_id", &self.agent_id)
            .field("correlation_id", &self.correlation_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
