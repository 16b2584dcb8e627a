//! Agent manifest - the declarative input that seeds a permission manager
//!
//! Loading the document from disk is somebody else's job; this module only
//! defines the in-memory shape and validates it.

use serde::{Deserialize, Serialize};

use crate::audit::AuditLevel;
use crate::core::{PolicyError, PolicyResult};
use crate::sandbox::SANDBOX_RUNTIME;

use super::model::PermissionSet;

/// Default audit buffer size
pub const DEFAULT_AUDIT_RECORDS: usize = 10_000;

/// Agent identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Resource limits handed to the sandbox launcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU quota (e.g. `"1.5"`)
    #[serde(default)]
    pub cpu: Option<String>,
    /// Memory limit (e.g. `"512m"`)
    #[serde(default)]
    pub memory: Option<String>,
    /// Maximum processes
    #[serde(default)]
    pub pids: Option<u32>,
}

/// Container security flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySpec {
    #[serde(default = "default_true")]
    pub read_only_root: bool,
    #[serde(default = "default_true")]
    pub no_new_privileges: bool,
    #[serde(default)]
    pub drop_capabilities: Vec<String>,
}

impl Default for SecuritySpec {
    fn default() -> Self {
        Self {
            read_only_root: true,
            no_new_privileges: true,
            drop_capabilities: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Audit verbosity and retention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSpec {
    #[serde(default)]
    pub level: AuditLevel,
    /// Ring buffer capacity
    #[serde(default = "default_audit_records")]
    pub max_records: usize,
}

impl Default for AuditSpec {
    fn default() -> Self {
        Self {
            level: AuditLevel::default(),
            max_records: DEFAULT_AUDIT_RECORDS,
        }
    }
}

fn default_audit_records() -> usize {
    DEFAULT_AUDIT_RECORDS
}

/// Manifest body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSpec {
    /// Container image the agent runs in
    pub image: String,
    /// Sandbox technology; must be `gvisor`
    pub runtime: String,
    pub permissions: PermissionSet,
    #[serde(default)]
    pub resources: ResourceLimits,
    #[serde(default)]
    pub security: SecuritySpec,
    #[serde(default)]
    pub audit: AuditSpec,
}

/// The declarative description of an agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
    pub spec: ManifestSpec,
}

impl AgentManifest {
    /// Build a manifest for `name` with the default api version and runtime
    pub fn new(name: impl Into<String>, image: impl Into<String>, permissions: PermissionSet) -> Self {
        Self {
            api_version: "agents/v1".to_string(),
            kind: "Agent".to_string(),
            metadata: ManifestMetadata {
                name: name.into(),
                version: "0.1.0".to_string(),
            },
            spec: ManifestSpec {
                image: image.into(),
                runtime: SANDBOX_RUNTIME.to_string(),
                permissions,
                ..Default::default()
            },
        }
    }

    /// Agent name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Validate the whole manifest, including its permission set
    pub fn validate(&self) -> PolicyResult<()> {
        if self.api_version.trim().is_empty() {
            return Err(PolicyError::validation("apiVersion is required"));
        }
        if self.kind.trim().is_empty() {
            return Err(PolicyError::validation("kind is required"));
        }
        if self.metadata.name.trim().is_empty() {
            return Err(PolicyError::validation("metadata.name is required"));
        }
        if self.spec.image.trim().is_empty() {
            return Err(PolicyError::validation("spec.image is required"));
        }
        if !self.spec.runtime.eq_ignore_ascii_case(SANDBOX_RUNTIME) {
            return Err(PolicyError::validation(format!(
                "spec.runtime must be '{}', got '{}'",
                SANDBOX_RUNTIME, self.spec.runtime
            )));
        }
        if self.spec.audit.max_records == 0 {
            return Err(PolicyError::validation("spec.audit.max_records must be positive"));
        }

        self.spec
            .permissions
            .validate()
            .map_err(|e| match e {
                PolicyError::Validation(msg) => {
                    PolicyError::validation(format!("spec.permissions: {}", msg))
                }
                other => other,
            })
    }
}
