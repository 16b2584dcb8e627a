//! Declarative permissions and the authorization engine
//!
//! - **Model**: `PermissionSet` with filesystem, executable, network,
//!   capability and IPC rules, plus validation
//! - **Manifest**: `AgentManifest`, the document that seeds a manager
//! - **Manager**: `PermissionManager`, default-deny matching of runtime
//!   requests, HITL escalation, audit and sandbox sync
//! - **Glob**: `glob_match`, the path/host pattern matcher
//!
//! ## Example
//!
//! ```rust,ignore
//! use shadow_agent_policy::permissions::{FileSystemPermission, FsAction, PermissionManager, PermissionSet};
//!
//! let permissions = PermissionSet::new()
//!     .with_filesystem(FileSystemPermission::new(FsAction::Read, "${workspace}/**"));
//! let manager = PermissionManager::new("/srv/agent", permissions, audit)?;
//!
//! manager.check_file_access(&ctx, FsAction::Read, "src/main.rs").await?;
//! ```

mod glob;
mod grant;
mod manager;
pub mod manifest;
mod model;
mod path;

pub use glob::{glob_match, segment_match};
pub use grant::{grant_key, GrantScope, PermissionGrant};
pub use manager::PermissionManager;
pub use manifest::{
    AgentManifest, AuditSpec, ManifestMetadata, ManifestSpec, ResourceLimits, SecuritySpec,
    DEFAULT_AUDIT_RECORDS,
};
pub use model::{
    has_traversal, CapabilityPermission, ExecutablePermission, FileSystemPermission, FsAction,
    IpcPermission, NetworkDirection, NetworkPermission, PermissionSet, WORKSPACE_PLACEHOLDER,
};
pub use path::{normalize_path, PathError};
