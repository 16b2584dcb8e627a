//! Permission grants - cached approvals for HITL-gated permissions

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifetime class of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantScope {
    /// A single use; defaults to a short expiry
    OneTime,
    /// Valid for the current session
    Session,
    /// Valid until explicitly revoked or expired
    Persistent,
    /// Valid while the attached conditions hold
    Conditional,
}

impl fmt::Display for GrantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GrantScope::OneTime => "one_time",
            GrantScope::Session => "session",
            GrantScope::Persistent => "persistent",
            GrantScope::Conditional => "conditional",
        };
        f.write_str(s)
    }
}

/// An approval record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// Grant id
    pub id: String,
    /// Action that was approved (`fs:write`, `exec`, `net:egress`, ...)
    pub action: String,
    /// Resource the action applies to
    pub resource: String,
    pub scope: GrantScope,
    /// Who approved it
    pub approver: String,
    pub issued_at: DateTime<Utc>,
    /// `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
    /// Structured conditions from the approver
    #[serde(default)]
    pub conditions: HashMap<String, String>,
}

impl PermissionGrant {
    /// Issue a grant now
    pub fn new(
        action: impl Into<String>,
        resource: impl Into<String>,
        scope: GrantScope,
        approver: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: action.into(),
            resource: resource.into(),
            scope,
            approver: approver.into(),
            issued_at: Utc::now(),
            expires_at: None,
            conditions: HashMap::new(),
        }
    }

    /// Expire after `ttl`
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(self.issued_at + ttl);
        self
    }

    /// Expire at a fixed instant
    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Attach conditions
    pub fn with_conditions(mut self, conditions: HashMap<String, String>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Cache key (`action:resource`)
    pub fn key(&self) -> String {
        grant_key(&self.action, &self.resource)
    }

    /// The permission descriptor (`action resource`)
    pub fn descriptor(&self) -> String {
        format!("{} {}", self.action, self.resource)
    }

    /// Whether the grant is expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }

    /// Whether the grant is expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Cache key for an action on a resource
pub fn grant_key(action: &str, resource: &str) -> String {
    format!("{}:{}", action, resource)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_expires_by_default() {
        let grant = PermissionGrant::new("fs:write", "/workspace/a.txt", GrantScope::Session, "ops");
        assert!(grant.expires_at.is_none());
        assert!(!grant.is_expired_at(Utc::now() + Duration::days(3650)));
        assert_eq!(grant.key(), "fs:write:/workspace/a.txt");
    }

    #[test]
    fn test_ttl_expiry() {
        let grant = PermissionGrant::new("exec", "rm", GrantScope::OneTime, "ops")
            .with_ttl(Duration::seconds(60));

        assert!(!grant.is_expired());
        assert!(grant.is_expired_at(grant.issued_at + Duration::seconds(60)));
        assert!(grant.is_expired_at(grant.issued_at + Duration::seconds(61)));
    }

    #[test]
    fn test_scope_serde_names() {
        let json = serde_json::to_string(&GrantScope::OneTime).unwrap();
        assert_eq!(json, "\"one_time\"");
        assert_eq!(GrantScope::Conditional.to_string(), "conditional");
    }
}
