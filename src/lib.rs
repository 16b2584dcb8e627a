//! Authorization core for sandboxed agents
//!
//! Every tool call an agent makes passes through a default-deny policy
//! engine before it touches the filesystem, spawns a process or opens a
//! connection:
//!
//! - `permissions` - declarative permission model, manifest and the
//!   `PermissionManager` authorization engine
//! - `hitl` - human-in-the-loop approval broker
//! - `sandbox` - gVisor runtime verification and network policy sync
//! - `audit` - bounded audit trail of every decision
//! - `tools` - tool trait and the authorization decorator
//! - `registration` - composes all of the above for one agent

pub mod core;
pub mod permissions;
pub mod tools;

pub mod audit;
pub mod hitl;
pub mod sandbox;

// Bootstrap
pub mod registration;

// Optional components
pub mod logging;

pub use crate::core::{AuthContext, Denial, DenialReason, PolicyError, PolicyResult};
pub use registration::{register_agent, AgentRegistration, RegistrationConfig};
