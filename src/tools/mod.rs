//! Tool system
//!
//! This module provides:
//! - `Tool` trait - Interface for implementing tools, with declared permissions
//! - `ToolResult` / `ToolContext` - Execution result and per-call context
//! - `AuthorizedTool` / `PermissionGate` - Authorization decorator
//! - `ToolRegistry` - Registry dispatching every call through the decorator

mod authorized;
mod registry;
mod tool;

pub use authorized::{AuthorizedTool, PermissionGate};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext, ToolResult};
