//! Audit record and query filter types

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which kind of permission a decision was about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionType {
    Filesystem,
    Executable,
    Network,
    Capability,
    Ipc,
    /// Tool-level subset check
    Tool,
    /// Manual grant issued by an operator
    Grant,
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermissionType::Filesystem => "filesystem",
            PermissionType::Executable => "executable",
            PermissionType::Network => "network",
            PermissionType::Capability => "capability",
            PermissionType::Ipc => "ipc",
            PermissionType::Tool => "tool",
            PermissionType::Grant => "grant",
        };
        f.write_str(s)
    }
}

/// Outcome of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Granted,
    Denied,
    /// Tool passed the subset check
    ToolAllowed,
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditResult::Granted => "granted",
            AuditResult::Denied => "denied",
            AuditResult::ToolAllowed => "tool_allowed",
        };
        f.write_str(s)
    }
}

/// One authorization decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub action: String,
    pub permission_type: PermissionType,
    pub resource: String,
    pub result: AuditResult,
    /// Denial reason, if any
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub correlation_id: String,
}

impl AuditRecord {
    /// Create a record stamped now
    pub fn new(
        agent_id: impl Into<String>,
        action: impl Into<String>,
        permission_type: PermissionType,
        resource: impl Into<String>,
        result: AuditResult,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            action: action.into(),
            permission_type,
            resource: resource.into(),
            result,
            reason: None,
            metadata: HashMap::new(),
            correlation_id: String::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Query filter; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub agent_id: Option<String>,
    pub action: Option<String>,
    pub permission_type: Option<PermissionType>,
    /// Exact resource match
    pub resource: Option<String>,
    pub result: Option<AuditResult>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Return at most this many (most recent) records
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// Match everything
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn permission_type(mut self, permission_type: PermissionType) -> Self {
        self.permission_type = Some(permission_type);
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn result(mut self, result: AuditResult) -> Self {
        self.result = Some(result);
        self
    }

    /// Inclusive time range
    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `record` passes the filter
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(agent_id) = &self.agent_id {
            if &record.agent_id != agent_id {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &record.action != action {
                return false;
            }
        }
        if let Some(permission_type) = self.permission_type {
            if record.permission_type != permission_type {
                return false;
            }
        }
        if let Some(resource) = &self.resource {
            if &record.resource != resource {
                return false;
            }
        }
        if let Some(result) = self.result {
            if record.result != result {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.timestamp > until {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> AuditRecord {
        AuditRecord::new(
            "agent-1",
            "fs:read",
            PermissionType::Filesystem,
            "/workspace/a.txt",
            AuditResult::Granted,
        )
        .with_correlation_id("corr-1")
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert!(AuditFilter::new().matches(&record()));
    }

    #[test]
    fn test_field_filters() {
        let r = record();
        assert!(AuditFilter::new().agent("agent-1").matches(&r));
        assert!(!AuditFilter::new().agent("agent-2").matches(&r));
        assert!(AuditFilter::new().action("fs:read").matches(&r));
        assert!(!AuditFilter::new().action("fs:write").matches(&r));
        assert!(AuditFilter::new()
            .permission_type(PermissionType::Filesystem)
            .matches(&r));
        assert!(!AuditFilter::new().permission_type(PermissionType::Network).matches(&r));
        assert!(AuditFilter::new().resource("/workspace/a.txt").matches(&r));
        assert!(!AuditFilter::new().result(AuditResult::Denied).matches(&r));
    }

    #[test]
    fn test_time_range() {
        let r = record();
        let hour = Duration::hours(1);
        assert!(AuditFilter::new()
            .between(r.timestamp - hour, r.timestamp + hour)
            .matches(&r));
        assert!(!AuditFilter::new()
            .between(r.timestamp + hour, r.timestamp + hour * 2)
            .matches(&r));
    }

    #[test]
    fn test_result_serde_names() {
        assert_eq!(
            serde_json::to_string(&AuditResult::ToolAllowed).unwrap(),
            "\"tool_allowed\""
        );
    }
}
