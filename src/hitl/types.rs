//! HITL message types
//!
//! - `PermissionRequest` - what an agent wants, sent to a human
//! - `PermissionDecision` - what the human said
//! - `RiskLevel` - presentation hint for approvers

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::GrantScope;

/// How dangerous the requested action is, for presentation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A request for human approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Assigned by the broker
    pub id: String,
    /// Assigned by the broker
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    /// Action being requested (`fs:write`, `exec`, ...)
    pub action: String,
    /// Resource the action targets
    pub resource: String,
    /// Why the agent needs it
    pub justification: String,
    /// Scope the requester proposes
    pub scope: GrantScope,
    pub risk_level: RiskLevel,
}

impl PermissionRequest {
    /// Create a request; id and timestamp are filled in by the broker
    pub fn new(
        agent_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            action: action.into(),
            resource: resource.into(),
            justification: String::new(),
            scope: GrantScope::Session,
            risk_level: RiskLevel::default(),
        }
    }

    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = justification.into();
        self
    }

    pub fn with_scope(mut self, scope: GrantScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    /// The permission descriptor (`action resource`)
    pub fn descriptor(&self) -> String {
        format!("{} {}", self.action, self.resource)
    }
}

/// A human's answer to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub request_id: String,
    pub approved: bool,
    pub approver: String,
    /// `None` inherits the request's proposed scope
    #[serde(default)]
    pub scope: Option<GrantScope>,
    /// `None` never expires (one-time grants default to a short lifetime)
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Reason, mostly for denials
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub conditions: HashMap<String, String>,
}

impl PermissionDecision {
    /// Approve `request_id`
    pub fn approve(request_id: impl Into<String>, approver: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            approved: true,
            approver: approver.into(),
            scope: None,
            expires_at: None,
            reason: None,
            conditions: HashMap::new(),
        }
    }

    /// Deny `request_id`
    pub fn deny(request_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            approved: false,
            approver: String::new(),
            scope: None,
            expires_at: None,
            reason: Some(reason.into()),
            conditions: HashMap::new(),
        }
    }

    pub fn with_scope(mut self, scope: GrantScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_condition(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }
}
