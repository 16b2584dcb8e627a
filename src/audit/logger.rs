//! Bounded, append-only audit sink
//!
//! Records live in a ring buffer: once `capacity` is reached the oldest
//! entry is evicted. Writers take the lock exclusively, queries share it.
//! Logging never fails and never panics - a poisoned lock is recovered - so
//! the authorization path can treat it as fire-and-forget.

use std::collections::VecDeque;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::permissions::manifest::AuditSpec;

use super::record::{AuditFilter, AuditRecord, AuditResult};

/// How much gets recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Denials only
    Minimal,
    /// Every decision
    #[default]
    Standard,
    /// Every decision plus request metadata
    Verbose,
}

/// Append-only audit log with bounded memory
#[derive(Debug)]
pub struct AuditLogger {
    capacity: usize,
    level: AuditLevel,
    records: RwLock<VecDeque<AuditRecord>>,
}

impl AuditLogger {
    /// Create a logger holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            level: AuditLevel::Standard,
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Create a logger from a manifest audit spec
    pub fn from_spec(spec: &AuditSpec) -> Self {
        Self::new(spec.max_records).with_level(spec.level)
    }

    /// Set the verbosity
    pub fn with_level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    /// Current verbosity
    pub fn level(&self) -> AuditLevel {
        self.level
    }

    /// Whether request metadata should be attached to records
    pub fn is_verbose(&self) -> bool {
        self.level == AuditLevel::Verbose
    }

    /// Maximum number of retained records
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest when full
    pub fn log(&self, record: AuditRecord) {
        if self.level == AuditLevel::Minimal && record.result != AuditResult::Denied {
            return;
        }

        tracing::info!(
            target: "audit",
            agent_id = %record.agent_id,
            action = %record.action,
            permission_type = %record.permission_type,
            resource = %record.resource,
            result = %record.result,
            reason = record.reason.as_deref().unwrap_or(""),
            correlation_id = %record.correlation_id,
            "authorization decision"
        );

        let mut records = self.write();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Records matching `filter`, oldest first
    ///
    /// With `filter.limit` set, only the most recent matches are returned.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        let records = self.read();
        let mut matched: Vec<AuditRecord> = records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            if matched.len() > limit {
                matched.drain(..matched.len() - limit);
            }
        }

        matched
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<AuditRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<AuditRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::from_spec(&AuditSpec::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::PermissionType;
    use std::sync::Arc;

    fn record(agent: &str, result: AuditResult) -> AuditRecord {
        AuditRecord::new(agent, "fs:read", PermissionType::Filesystem, "/w/a", result)
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let logger = AuditLogger::new(3);
        for i in 0..5 {
            logger.log(record(&format!("agent-{}", i), AuditResult::Granted));
        }

        assert_eq!(logger.len(), 3);
        let agents: Vec<String> = logger
            .query(&AuditFilter::new())
            .into_iter()
            .map(|r| r.agent_id)
            .collect();
        assert_eq!(agents, vec!["agent-2", "agent-3", "agent-4"]);
    }

    #[test]
    fn test_query_filters_and_limit() {
        let logger = AuditLogger::new(100);
        logger.log(record("a", AuditResult::Granted));
        logger.log(record("a", AuditResult::Denied));
        logger.log(record("b", AuditResult::Denied));
        logger.log(record("a", AuditResult::Denied));

        let denied_a = logger.query(&AuditFilter::new().agent("a").result(AuditResult::Denied));
        assert_eq!(denied_a.len(), 2);

        let last = logger.query(&AuditFilter::new().limit(1));
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].agent_id, "a");
        assert_eq!(last[0].result, AuditResult::Denied);
    }

    #[test]
    fn test_minimal_level_keeps_denials_only() {
        let logger = AuditLogger::new(10).with_level(AuditLevel::Minimal);
        logger.log(record("a", AuditResult::Granted));
        logger.log(record("a", AuditResult::ToolAllowed));
        logger.log(record("a", AuditResult::Denied));

        assert_eq!(logger.len(), 1);
        assert!(!logger.is_verbose());
    }

    #[test]
    fn test_from_spec() {
        let spec = AuditSpec {
            level: AuditLevel::Verbose,
            max_records: 7,
        };
        let logger = AuditLogger::from_spec(&spec);
        assert_eq!(logger.capacity(), 7);
        assert!(logger.is_verbose());
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let logger = Arc::new(AuditLogger::new(50));
        let mut handles = Vec::new();

        for t in 0..8 {
            let logger = logger.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    logger.log(record(&format!("agent-{}", t), AuditResult::Granted));
                    let _ = logger.query(&AuditFilter::new().agent("agent-0"));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(logger.len(), 50);
    }
}
