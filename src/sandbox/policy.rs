//! Sandbox policy and the launch interface it is applied to

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::PolicyResult;
use crate::permissions::{NetworkDirection, NetworkPermission};

/// One network allow-list entry enforced by the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkRule {
    pub direction: NetworkDirection,
    pub protocol: String,
    /// Empty for ingress and host-less DNS rules
    #[serde(default)]
    pub host: String,
    /// 0 = any port
    #[serde(default)]
    pub port: u16,
}

impl NetworkRule {
    pub fn new(
        direction: NetworkDirection,
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            direction,
            protocol: protocol.into(),
            host: host.into(),
            port,
        }
    }

    /// Rule mirroring a declared permission, if its direction parses
    pub fn from_permission(permission: &NetworkPermission) -> Option<Self> {
        Some(Self::new(
            permission.parsed_direction()?,
            permission.protocol.clone(),
            permission.host.clone(),
            permission.port,
        ))
    }

    /// `host:port` (or `proto/port` for ingress)
    pub fn endpoint(&self) -> String {
        match self.direction {
            NetworkDirection::Ingress => format!("{}/{}", self.protocol, self.port),
            _ if self.port == 0 => self.host.clone(),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

/// Policy the external launcher applies to the next container it starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    #[serde(default)]
    pub network_rules: Vec<NetworkRule>,
    #[serde(default = "default_readonly_root")]
    pub readonly_root: bool,
}

fn default_readonly_root() -> bool {
    true
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            network_rules: Vec::new(),
            readonly_root: true,
        }
    }
}

impl SandboxPolicy {
    pub fn new(network_rules: Vec<NetworkRule>, readonly_root: bool) -> Self {
        Self {
            network_rules,
            readonly_root,
        }
    }

    /// Whether any outbound traffic is allowed
    pub fn allows_egress(&self) -> bool {
        self.network_rules
            .iter()
            .any(|r| matches!(r.direction, NetworkDirection::Egress | NetworkDirection::Dns))
    }

    pub fn contains(&self, rule: &NetworkRule) -> bool {
        self.network_rules.contains(rule)
    }
}

/// A command to run inside the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub workdir: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl LaunchRequest {
    pub fn new<I, S>(workdir: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            workdir: workdir.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            stdin: None,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Output of a sandboxed command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Process launcher that runs commands inside the sandbox
///
/// Implementations compose their invocation from the policy most recently
/// pushed through `SandboxRuntime::enforce_policy`.
#[async_trait]
pub trait SandboxLauncher: Send + Sync {
    async fn launch(&self, request: LaunchRequest) -> PolicyResult<LaunchOutput>;
}
