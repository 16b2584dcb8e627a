//! Tool trait definition
//!
//! Every tool declares the permissions it needs up front and receives a
//! `ToolContext` through which it asks the permission manager for each
//! concrete filesystem, process or network action it performs.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AuthContext;
use crate::permissions::{PermissionManager, PermissionSet};

/// Result of executing a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The output of the tool
    pub output: String,
    /// Whether the tool execution resulted in an error
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful tool result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    /// Create an error tool result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: message.into(),
            is_error: true,
        }
    }
}

/// What an authorized tool gets to work with
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Identity, correlation id and cancellation of the call
    pub auth: AuthContext,
    /// Live manager for the concrete `check_*` calls
    pub manager: Arc<PermissionManager>,
}

impl ToolContext {
    pub fn new(auth: AuthContext, manager: Arc<PermissionManager>) -> Self {
        Self { auth, manager }
    }

    pub fn agent_id(&self) -> &str {
        &self.auth.agent_id
    }
}

/// Trait for tools that an agent can use
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the name of this tool
    fn name(&self) -> &str;

    /// Get a description of this tool
    fn description(&self) -> &str;

    /// Permissions this tool needs
    ///
    /// Must be contained in the hosting agent's declared set; `${workspace}`
    /// placeholders are resolved against the agent's workspace.
    fn permissions(&self) -> PermissionSet;

    /// Execute the tool with the given input
    ///
    /// Only called after the tool passed the subset check. Concrete actions
    /// still go through `ctx.manager`.
    async fn execute(&self, ctx: &ToolContext, input: &Value) -> Result<ToolResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_success() {
        let result = ToolResult::success("output");
        assert_eq!(result.output, "output");
        assert!(!result.is_error);
    }

    #[test]
    fn test_tool_result_error() {
        let result = ToolResult::error("error message");
        assert_eq!(result.output, "error message");
        assert!(result.is_error);
    }
}
