//! Authorization decorator around tools
//!
//! Every registered tool is wrapped in an `AuthorizedTool` sharing one
//! `PermissionGate`. The gate may be filled before or after registration;
//! until it is, every call fails closed.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::core::{AuthContext, DenialReason, PolicyError, PolicyResult};
use crate::permissions::PermissionManager;

use super::tool::{Tool, ToolContext, ToolResult};

/// Slot holding the permission manager shared by all wrapped tools
#[derive(Default)]
pub struct PermissionGate {
    manager: RwLock<Option<Arc<PermissionManager>>>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the manager
    pub fn install(&self, manager: Arc<PermissionManager>) {
        *self.manager.write().unwrap_or_else(|e| e.into_inner()) = Some(manager);
    }

    pub fn current(&self) -> Option<Arc<PermissionManager>> {
        self.manager.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_installed(&self) -> bool {
        self.current().is_some()
    }
}

impl fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionGate")
            .field("installed", &self.is_installed())
            .finish()
    }
}

/// A tool that must pass the subset check before it runs
#[derive(Clone)]
pub struct AuthorizedTool {
    inner: Arc<dyn Tool>,
    gate: Arc<PermissionGate>,
}

impl AuthorizedTool {
    pub fn new(inner: Arc<dyn Tool>, gate: Arc<PermissionGate>) -> Self {
        Self { inner, gate }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// The wrapped tool
    pub fn inner(&self) -> &Arc<dyn Tool> {
        &self.inner
    }

    /// Authorize, then run the wrapped tool
    ///
    /// Policy errors raised inside the tool (for example a denied
    /// `check_file_access`) come back unchanged; other failures become
    /// `PolicyError::Tool`.
    pub async fn execute(&self, auth: &AuthContext, input: &Value) -> PolicyResult<ToolResult> {
        let name = self.inner.name();

        let Some(manager) = self.gate.current() else {
            tracing::warn!("[AuthorizedTool] {} called without a permission manager", name);
            return Err(PolicyError::denied(
                format!("tool {}", name),
                DenialReason::Unmanaged,
            ));
        };

        manager.authorize_tool(auth, name, &self.inner.permissions(), input)?;

        let ctx = ToolContext::new(auth.clone(), manager);
        self.inner
            .execute(&ctx, input)
            .await
            .map_err(|e| match e.downcast::<PolicyError>() {
                Ok(policy) => policy,
                Err(other) => PolicyError::Tool(format!("{}: {:#}", name, other)),
            })
    }
}

impl fmt::Debug for AuthorizedTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedTool")
            .field("name", &self.inner.name())
            .field("gate", &self.gate)
            .finish()
    }
}
