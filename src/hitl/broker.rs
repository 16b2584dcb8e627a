//! HITL broker - pending approval requests and grant issuance
//!
//! Each pending request owns its own oneshot rendezvous, so a slow or
//! ignored approval never blocks unrelated requests. The pending table is
//! the only shared state and is guarded by a short-held mutex that is never
//! kept across an await.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::{DenialReason, PolicyError, PolicyResult};
use crate::permissions::{GrantScope, PermissionGrant};

use super::types::{PermissionDecision, PermissionRequest};

/// Default time a request may stay pending (5 minutes)
pub const DEFAULT_HITL_TIMEOUT: Duration = Duration::from_secs(300);

/// Lifetime of a one-time grant approved without an explicit expiry
pub const ONE_TIME_GRANT_TTL_SECS: i64 = 60;

type Resolution = PolicyResult<PermissionGrant>;

/// Source of human approvals consumed by the permission manager
#[async_trait]
pub trait HitlProvider: Send + Sync {
    /// Ask for approval and wait for the answer
    ///
    /// Must return promptly once `cancel` fires.
    async fn request_permission(
        &self,
        cancel: &CancellationToken,
        request: PermissionRequest,
    ) -> PolicyResult<PermissionGrant>;
}

struct PendingEntry {
    request: PermissionRequest,
    responder: oneshot::Sender<Resolution>,
}

/// Broker for human-in-the-loop approvals
///
/// Supports two flows:
/// - blocking: [`request_permission`](Self::request_permission) waits for a
///   decision, cancellation or timeout
/// - decoupled: [`submit_async`](Self::submit_async) returns immediately and
///   an operator later calls [`approve`](Self::approve) / [`deny`](Self::deny)
pub struct HitlBroker {
    timeout: Duration,
    pending: Mutex<HashMap<String, PendingEntry>>,
}

impl HitlBroker {
    /// Create a broker with the default timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_HITL_TIMEOUT)
    }

    /// Create a broker with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Submit a request and wait for a decision
    ///
    /// Races the decision against `cancel` and the broker timeout. The
    /// pending entry is removed on every exit path, including when the
    /// returned future is dropped.
    pub async fn request_permission(
        &self,
        cancel: &CancellationToken,
        request: PermissionRequest,
    ) -> PolicyResult<PermissionGrant> {
        let (request, rx) = self.register(request);
        let _guard = PendingGuard {
            broker: self,
            id: request.id.clone(),
        };

        tracing::info!(
            "[HitlBroker] Waiting for approval {} ({}) for agent {}",
            request.id,
            request.descriptor(),
            request.agent_id
        );

        tokio::select! {
            resolution = rx => match resolution {
                Ok(resolution) => resolution,
                Err(_) => Err(PolicyError::HitlTimeout {
                    action: request.action.clone(),
                }),
            },
            _ = cancel.cancelled() => {
                tracing::info!("[HitlBroker] Request {} cancelled", request.id);
                Err(PolicyError::Cancelled)
            }
            _ = tokio::time::sleep(self.timeout) => {
                tracing::warn!(
                    "[HitlBroker] Request {} timed out after {:?}",
                    request.id,
                    self.timeout
                );
                Err(PolicyError::HitlTimeout {
                    action: request.action.clone(),
                })
            }
        }
    }

    /// Submit a request without waiting
    ///
    /// The returned handle can be awaited or polled by the requester; the
    /// approver resolves it through [`approve`](Self::approve) or
    /// [`deny`](Self::deny).
    pub fn submit_async(&self, request: PermissionRequest) -> AsyncApproval {
        self.sweep_stale();
        let (request, receiver) = self.register(request);

        tracing::info!(
            "[HitlBroker] Submitted async request {} ({})",
            request.id,
            request.descriptor()
        );

        AsyncApproval { request, receiver }
    }

    /// Approve a pending request
    ///
    /// Without an explicit scope the grant inherits the scope proposed in
    /// the request. One-time grants without an expiry get a short lifetime.
    pub fn approve(&self, mut decision: PermissionDecision) -> PolicyResult<PermissionGrant> {
        decision.approved = true;
        let entry = self.take(&decision.request_id)?;
        let grant = grant_from_decision(&entry.request, &decision);

        tracing::info!(
            "[HitlBroker] Request {} approved by {} ({} scope)",
            entry.request.id,
            grant.approver,
            grant.scope
        );

        // Requester may have gone away; the grant is still returned
        let _ = entry.responder.send(Ok(grant.clone()));
        Ok(grant)
    }

    /// Deny a pending request
    pub fn deny(&self, request_id: &str, reason: impl Into<String>) -> PolicyResult<()> {
        let reason = reason.into();
        let entry = self.take(request_id)?;

        tracing::info!("[HitlBroker] Request {} denied: {}", request_id, reason);

        let _ = entry.responder.send(Err(PolicyError::denied(
            entry.request.descriptor(),
            DenialReason::DeniedByApprover(reason),
        )));
        Ok(())
    }

    /// Apply a decision, routing to approve or deny
    pub fn decide(&self, decision: PermissionDecision) -> PolicyResult<Option<PermissionGrant>> {
        if decision.approved {
            self.approve(decision).map(Some)
        } else {
            let reason = decision
                .reason
                .unwrap_or_else(|| "no reason given".to_string());
            self.deny(&decision.request_id, reason).map(|_| None)
        }
    }

    /// Snapshot of all pending requests, oldest first
    pub fn pending_requests(&self) -> Vec<PermissionRequest> {
        self.sweep_stale();
        let mut requests: Vec<PermissionRequest> = self
            .lock()
            .values()
            .map(|entry| entry.request.clone())
            .collect();
        requests.sort_by_key(|r| r.timestamp);
        requests
    }

    /// Whether `request_id` is still pending
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.lock().contains_key(request_id)
    }

    /// Number of pending requests
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Issue a grant directly, without a request
    ///
    /// Operator override. The result is shaped like any other grant so the
    /// manager caches it the same way.
    pub fn grant_manual(
        action: impl Into<String>,
        resource: impl Into<String>,
        scope: GrantScope,
        approver: impl Into<String>,
        ttl: Option<chrono::Duration>,
    ) -> PermissionGrant {
        let grant = PermissionGrant::new(action, resource, scope, approver);
        let ttl = match (ttl, scope) {
            (Some(ttl), _) => Some(ttl),
            (None, GrantScope::OneTime) => Some(chrono::Duration::seconds(ONE_TIME_GRANT_TTL_SECS)),
            (None, _) => None,
        };

        let grant = match ttl {
            Some(ttl) => grant.with_ttl(ttl),
            None => grant,
        };

        tracing::info!(
            "[HitlBroker] Manual grant {} for {} by {}",
            grant.id,
            grant.descriptor(),
            grant.approver
        );
        grant
    }

    fn register(
        &self,
        mut request: PermissionRequest,
    ) -> (PermissionRequest, oneshot::Receiver<Resolution>) {
        request.id = uuid::Uuid::new_v4().to_string();
        request.timestamp = Utc::now();

        let (tx, rx) = oneshot::channel();
        self.lock().insert(
            request.id.clone(),
            PendingEntry {
                request: request.clone(),
                responder: tx,
            },
        );

        (request, rx)
    }

    fn take(&self, request_id: &str) -> PolicyResult<PendingEntry> {
        self.lock()
            .remove(request_id)
            .ok_or_else(|| PolicyError::UnknownRequest(request_id.to_string()))
    }

    fn remove(&self, request_id: &str) {
        self.lock().remove(request_id);
    }

    /// Drop requests that outlived the timeout; their waiters see a timeout
    fn sweep_stale(&self) {
        let max_age =
            chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - max_age;

        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|_, entry| entry.request.timestamp > cutoff);
        let swept = before - pending.len();
        if swept > 0 {
            tracing::warn!("[HitlBroker] Discarded {} timed out request(s)", swept);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for HitlBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HitlBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HitlBroker")
            .field("timeout", &self.timeout)
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[async_trait]
impl HitlProvider for HitlBroker {
    async fn request_permission(
        &self,
        cancel: &CancellationToken,
        request: PermissionRequest,
    ) -> PolicyResult<PermissionGrant> {
        HitlBroker::request_permission(self, cancel, request).await
    }
}

/// Removes a pending entry when the waiting future finishes or is dropped
struct PendingGuard<'a> {
    broker: &'a HitlBroker,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.broker.remove(&self.id);
    }
}

/// Requester side of a decoupled approval
#[derive(Debug)]
pub struct AsyncApproval {
    request: PermissionRequest,
    receiver: oneshot::Receiver<Resolution>,
}

impl AsyncApproval {
    /// Broker-assigned request id
    pub fn id(&self) -> &str {
        &self.request.id
    }

    /// The submitted request
    pub fn request(&self) -> &PermissionRequest {
        &self.request
    }

    /// Wait for the decision
    ///
    /// A request discarded as stale resolves to a timeout.
    pub async fn wait(self, cancel: &CancellationToken) -> PolicyResult<PermissionGrant> {
        let action = self.request.action.clone();
        tokio::select! {
            resolution = self.receiver => match resolution {
                Ok(resolution) => resolution,
                Err(_) => Err(PolicyError::HitlTimeout { action }),
            },
            _ = cancel.cancelled() => Err(PolicyError::Cancelled),
        }
    }

    /// Poll for the decision without waiting
    ///
    /// Returns `None` while the request is still pending.
    pub fn try_result(&mut self) -> Option<PolicyResult<PermissionGrant>> {
        match self.receiver.try_recv() {
            Ok(resolution) => Some(resolution),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PolicyError::HitlTimeout {
                action: self.request.action.clone(),
            })),
        }
    }
}

fn grant_from_decision(request: &PermissionRequest, decision: &PermissionDecision) -> PermissionGrant {
    let scope = decision.scope.unwrap_or(request.scope);
    let expires_at = match (decision.expires_at, scope) {
        (Some(expiry), _) => Some(expiry),
        (None, GrantScope::OneTime) => {
            Some(Utc::now() + chrono::Duration::seconds(ONE_TIME_GRANT_TTL_SECS))
        }
        (None, _) => None,
    };

    PermissionGrant::new(
        request.action.clone(),
        request.resource.clone(),
        scope,
        decision.approver.clone(),
    )
    .with_expiry(expires_at)
    .with_conditions(decision.conditions.clone())
}
