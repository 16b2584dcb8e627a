//! Tool registry for managing available tools
//!
//! Tools are wrapped in `AuthorizedTool` on registration, so installing a
//! permission manager later enables enforcement for every tool at once.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::authorized::{AuthorizedTool, PermissionGate};
use super::tool::{Tool, ToolResult};
use crate::core::{AuthContext, PolicyError, PolicyResult};
use crate::permissions::{PermissionManager, PermissionSet};

/// Registry that holds all available tools
pub struct ToolRegistry {
    tools: HashMap<String, AuthorizedTool>,
    gate: Arc<PermissionGate>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            gate: Arc::new(PermissionGate::new()),
        }
    }

    /// Register a tool in the registry
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an already shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::info!("[ToolRegistry] Registering tool: {}", name);
        self.tools
            .insert(name, AuthorizedTool::new(tool, self.gate.clone()));
    }

    /// Enforce `manager` for every registered and future tool
    pub fn set_permission_manager(&self, manager: Arc<PermissionManager>) {
        tracing::info!(
            "[ToolRegistry] Permission manager installed for {} tool(s)",
            self.tools.len()
        );
        self.gate.install(manager);
    }

    pub fn permission_manager(&self) -> Option<Arc<PermissionManager>> {
        self.gate.current()
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.inner().clone())
    }

    /// Permissions a tool declares
    pub fn required_permissions(&self, name: &str) -> Option<PermissionSet> {
        self.tools.get(name).map(|t| t.inner().permissions())
    }

    /// Execute a tool by name through the permission subsystem
    pub async fn execute(
        &self,
        auth: &AuthContext,
        name: &str,
        input: &Value,
    ) -> PolicyResult<ToolResult> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| PolicyError::Tool(format!("Tool not found: {}", name)))?;

        tracing::info!("[ToolRegistry] Executing tool: {} for {}", name, auth.agent_id);
        tracing::debug!("Input: {:?}", input);

        let result = tool.execute(auth, input).await?;

        tracing::debug!("Tool {} completed. Is error: {}", name, result.is_error);

        Ok(result)
    }

    /// Get the list of tool names, sorted
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .field("gate", &self.gate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLogger;
    use crate::core::DenialReason;
    use crate::permissions::{FileSystemPermission, FsAction};
    use crate::tools::ToolContext;
    use async_trait::async_trait;

    /// Reads a file from the workspace through the manager
    struct ReadFileTool;

    #[async_trait]
    impl Tool for ReadFileTool {
        fn name(&self) -> &str {
            "read_file"
        }

        fn description(&self) -> &str {
            "Read a file from the workspace"
        }

        fn permissions(&self) -> PermissionSet {
            PermissionSet::new().with_filesystem(FileSystemPermission::new(
                FsAction::Read,
                "${workspace}/**",
            ))
        }

        async fn execute(&self, ctx: &ToolContext, input: &Value) -> anyhow::Result<ToolResult> {
            let path = input["path"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("path is required"))?;
            let path = ctx
                .manager
                .check_file_access(&ctx.auth, FsAction::Read, path)
                .await?;
            let content = tokio::fs::read_to_string(&path).await?;
            Ok(ToolResult::success(content))
        }
    }

    /// Wants more than any agent in these tests declares
    struct ShadowTool;

    #[async_trait]
    impl Tool for ShadowTool {
        fn name(&self) -> &str {
            "shadow"
        }

        fn description(&self) -> &str {
            "Reads /etc/shadow"
        }

        fn permissions(&self) -> PermissionSet {
            PermissionSet::new()
                .with_filesystem(FileSystemPermission::new(FsAction::Read, "/etc/**"))
        }

        async fn execute(&self, _ctx: &ToolContext, _input: &Value) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::success("unreachable"))
        }
    }

    fn manager_for(dir: &std::path::Path) -> Arc<PermissionManager> {
        Arc::new(
            PermissionManager::new(
                dir,
                PermissionSet::new().with_filesystem(FileSystemPermission::new(
                    FsAction::Read,
                    "${workspace}/**",
                )),
                Arc::new(AuditLogger::new(100)),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_empty_registry() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.get("nonexistent").is_none());
    }

    #[tokio::test]
    async fn test_fails_closed_without_manager() {
        let mut registry = ToolRegistry::new();
        registry.register(ReadFileTool);

        let err = registry
            .execute(&AuthContext::new("a"), "read_file", &serde_json::json!({"path": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.denial().map(|d| d.reason.clone()), Some(DenialReason::Unmanaged));
    }

    #[tokio::test]
    async fn test_manager_installed_after_registration() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let mut registry = ToolRegistry::new();
        registry.register(ReadFileTool);
        registry.register(ShadowTool);
        registry.set_permission_manager(manager_for(dir.path()));

        let auth = AuthContext::new("a");
        let result = registry
            .execute(&auth, "read_file", &serde_json::json!({"path": "a.txt"}))
            .await
            .unwrap();
        assert_eq!(result.output, "hello");

        let err = registry
            .execute(&auth, "shadow", &Value::Null)
            .await
            .unwrap_err();
        assert_eq!(
            err.denial().map(|d| d.reason.clone()),
            Some(DenialReason::ExceedsAgentPermissions)
        );
    }

    #[tokio::test]
    async fn test_inner_denials_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ToolRegistry::new();
        registry.set_permission_manager(manager_for(dir.path()));
        registry.register(ReadFileTool);

        let auth = AuthContext::new("a");
        let err = registry
            .execute(&auth, "read_file", &serde_json::json!({"path": "../etc/passwd"}))
            .await
            .unwrap_err();
        assert_eq!(
            err.denial().map(|d| d.reason.clone()),
            Some(DenialReason::PathTraversal)
        );

        let err = registry
            .execute(&auth, "read_file", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Tool(ref msg) if msg.contains("path is required")));

        let err = registry
            .execute(&auth, "missing", &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Tool(ref msg) if msg.contains("Tool not found")));
    }

    #[test]
    fn test_names_and_requirements() {
        let mut registry = ToolRegistry::new();
        registry.register(ShadowTool);
        registry.register(ReadFileTool);

        assert_eq!(registry.tool_names(), vec!["read_file", "shadow"]);
        assert_eq!(
            registry.required_permissions("shadow").unwrap().filesystem[0].path,
            "/etc/**"
        );
    }
}
