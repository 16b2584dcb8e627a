//! Declarative permission model
//!
//! A `PermissionSet` is the capability envelope of an agent (or of a tool).
//! The rule types mirror the manifest document, so string fields such as
//! `action` and `direction` are parsed during validation rather than at
//! deserialization time: a malformed manifest is reported by `validate()`
//! instead of silently defaulting.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{PolicyError, PolicyResult};

/// Placeholder rewritten to the agent's base path
pub const WORKSPACE_PLACEHOLDER: &str = "${workspace}";

/// Filesystem verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsAction {
    /// Read file contents
    Read,
    /// Create or modify files
    Write,
    /// Execute a file
    Execute,
    /// List a directory
    List,
}

impl FsAction {
    /// The namespaced action string (`fs:read`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            FsAction::Read => "fs:read",
            FsAction::Write => "fs:write",
            FsAction::Execute => "fs:execute",
            FsAction::List => "fs:list",
        }
    }
}

impl fmt::Display for FsAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsAction {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let verb = s.strip_prefix("fs:").ok_or_else(|| {
            PolicyError::validation(format!("filesystem action '{}' must use the fs: prefix", s))
        })?;

        match verb {
            "read" => Ok(FsAction::Read),
            "write" => Ok(FsAction::Write),
            "execute" => Ok(FsAction::Execute),
            "list" => Ok(FsAction::List),
            _ => Err(PolicyError::validation(format!(
                "unknown filesystem action '{}'",
                s
            ))),
        }
    }
}

/// Network traffic direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkDirection {
    /// Outbound connections
    Egress,
    /// Inbound connections
    Ingress,
    /// Name resolution
    Dns,
}

impl NetworkDirection {
    /// Lowercase name as used in manifests
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkDirection::Egress => "egress",
            NetworkDirection::Ingress => "ingress",
            NetworkDirection::Dns => "dns",
        }
    }
}

impl fmt::Display for NetworkDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkDirection {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "egress" => Ok(NetworkDirection::Egress),
            "ingress" => Ok(NetworkDirection::Ingress),
            "dns" => Ok(NetworkDirection::Dns),
            other => Err(PolicyError::validation(format!(
                "unknown network direction '{}'",
                other
            ))),
        }
    }
}

/// Filesystem access rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemPermission {
    /// Namespaced action (`fs:read`, `fs:write`, `fs:execute`, `fs:list`)
    pub action: String,
    /// Path glob
    pub path: String,
    #[serde(default)]
    pub hitl_required: bool,
    #[serde(default)]
    pub justification: String,
}

impl FileSystemPermission {
    /// Create a rule that does not need human approval
    pub fn new(action: FsAction, path: impl Into<String>) -> Self {
        Self {
            action: action.as_str().to_string(),
            path: path.into(),
            hitl_required: false,
            justification: String::new(),
        }
    }

    /// Require human approval for this rule
    pub fn with_hitl(mut self) -> Self {
        self.hitl_required = true;
        self
    }

    /// Attach a justification
    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = justification.into();
        self
    }
}

/// Executable invocation rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutablePermission {
    /// Binary name, never a path
    pub binary: String,
    /// Argument patterns; empty or `["*"]` allows any arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment patterns (`KEY=VALUE`, `KEY=*`); empty or `["*"]` allows any
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub hitl_required: bool,
}

impl ExecutablePermission {
    /// Allow `binary` with any arguments and environment
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            env: Vec::new(),
            hitl_required: false,
        }
    }

    /// Restrict arguments to these patterns
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict environment to these patterns
    pub fn with_env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = env.into_iter().map(Into::into).collect();
        self
    }

    /// Require human approval for this rule
    pub fn with_hitl(mut self) -> Self {
        self.hitl_required = true;
        self
    }
}

/// Network access rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPermission {
    /// `egress`, `ingress` or `dns`
    pub direction: String,
    /// Protocol (`tcp`, `udp`, `https`, ... or `*`)
    pub protocol: String,
    /// Host, host glob or `*`; required for egress
    #[serde(default)]
    pub host: String,
    /// Port, 0 = any
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub hitl_required: bool,
}

impl NetworkPermission {
    /// Outbound rule
    pub fn egress(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            direction: NetworkDirection::Egress.as_str().to_string(),
            protocol: protocol.into(),
            host: host.into(),
            port,
            hitl_required: false,
        }
    }

    /// Inbound rule
    pub fn ingress(protocol: impl Into<String>, port: u16) -> Self {
        Self {
            direction: NetworkDirection::Ingress.as_str().to_string(),
            protocol: protocol.into(),
            host: String::new(),
            port,
            hitl_required: false,
        }
    }

    /// DNS rule; an empty host allows any lookup
    pub fn dns(host: impl Into<String>) -> Self {
        Self {
            direction: NetworkDirection::Dns.as_str().to_string(),
            protocol: "udp".to_string(),
            host: host.into(),
            port: 53,
            hitl_required: false,
        }
    }

    /// Require human approval for this rule
    pub fn with_hitl(mut self) -> Self {
        self.hitl_required = true;
        self
    }

    /// Parsed direction, if valid
    pub fn parsed_direction(&self) -> Option<NetworkDirection> {
        self.direction.parse().ok()
    }
}

/// Named capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityPermission {
    pub capability: String,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub hitl_required: bool,
}

impl CapabilityPermission {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            justification: String::new(),
            hitl_required: false,
        }
    }

    pub fn with_hitl(mut self) -> Self {
        self.hitl_required = true;
        self
    }
}

/// Inter-process communication rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcPermission {
    /// Channel kind (`unix_socket`, `dbus`, `pipe`, ...)
    pub kind: String,
    /// Target glob
    pub target: String,
    #[serde(default)]
    pub hitl_required: bool,
}

impl IpcPermission {
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
            hitl_required: false,
        }
    }

    pub fn with_hitl(mut self) -> Self {
        self.hitl_required = true;
        self
    }
}

/// The declared capability envelope of an agent or tool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default)]
    pub filesystem: Vec<FileSystemPermission>,
    #[serde(default)]
    pub executables: Vec<ExecutablePermission>,
    #[serde(default)]
    pub network: Vec<NetworkPermission>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityPermission>,
    #[serde(default)]
    pub ipc: Vec<IpcPermission>,
}

impl PermissionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filesystem rule
    pub fn with_filesystem(mut self, permission: FileSystemPermission) -> Self {
        self.filesystem.push(permission);
        self
    }

    /// Add an executable rule
    pub fn with_executable(mut self, permission: ExecutablePermission) -> Self {
        self.executables.push(permission);
        self
    }

    /// Add a network rule
    pub fn with_network(mut self, permission: NetworkPermission) -> Self {
        self.network.push(permission);
        self
    }

    /// Add a capability
    pub fn with_capability(mut self, permission: CapabilityPermission) -> Self {
        self.capabilities.push(permission);
        self
    }

    /// Add an IPC rule
    pub fn with_ipc(mut self, permission: IpcPermission) -> Self {
        self.ipc.push(permission);
        self
    }

    /// Whether nothing is declared at all
    pub fn is_empty(&self) -> bool {
        self.filesystem.is_empty()
            && self.executables.is_empty()
            && self.network.is_empty()
            && self.capabilities.is_empty()
            && self.ipc.is_empty()
    }

    /// Validate an agent's envelope
    ///
    /// Requires at least one filesystem or executable rule on top of the
    /// per-entry checks in [`validate_entries`](Self::validate_entries).
    pub fn validate(&self) -> PolicyResult<()> {
        if self.filesystem.is_empty() && self.executables.is_empty() {
            return Err(PolicyError::validation(
                "permission set must declare at least one filesystem or executable permission",
            ));
        }
        self.validate_entries()
    }

    /// Per-entry validation
    pub fn validate_entries(&self) -> PolicyResult<()> {
        for (i, fs) in self.filesystem.iter().enumerate() {
            if fs.path.trim().is_empty() {
                return Err(PolicyError::validation(format!(
                    "filesystem[{}]: path is required",
                    i
                )));
            }
            if has_traversal(&fs.path) {
                return Err(PolicyError::validation(format!(
                    "filesystem[{}]: path '{}' contains a traversal sequence",
                    i, fs.path
                )));
            }
            fs.action
                .parse::<FsAction>()
                .map_err(|e| PolicyError::validation(format!("filesystem[{}]: {}", i, e)))?;
        }

        for (i, exec) in self.executables.iter().enumerate() {
            if exec.binary.trim().is_empty() {
                return Err(PolicyError::validation(format!(
                    "executables[{}]: binary is required",
                    i
                )));
            }
            if exec.binary.contains('/') || exec.binary.contains('\\') {
                return Err(PolicyError::validation(format!(
                    "executables[{}]: binary '{}' must be a name, not a path",
                    i, exec.binary
                )));
            }
            if let Some(arg) = exec.args.iter().find(|a| has_traversal(a)) {
                return Err(PolicyError::validation(format!(
                    "executables[{}]: argument pattern '{}' contains a traversal sequence",
                    i, arg
                )));
            }
        }

        for (i, net) in self.network.iter().enumerate() {
            if net.direction.trim().is_empty() {
                return Err(PolicyError::validation(format!(
                    "network[{}]: direction is required",
                    i
                )));
            }
            if net.protocol.trim().is_empty() {
                return Err(PolicyError::validation(format!(
                    "network[{}]: protocol is required",
                    i
                )));
            }
            let direction = net
                .direction
                .parse::<NetworkDirection>()
                .map_err(|e| PolicyError::validation(format!("network[{}]: {}", i, e)))?;
            if direction == NetworkDirection::Egress && net.host.trim().is_empty() {
                return Err(PolicyError::validation(format!(
                    "network[{}]: egress requires a host",
                    i
                )));
            }
        }

        for (i, cap) in self.capabilities.iter().enumerate() {
            if cap.capability.trim().is_empty() {
                return Err(PolicyError::validation(format!(
                    "capabilities[{}]: name is required",
                    i
                )));
            }
        }

        for (i, ipc) in self.ipc.iter().enumerate() {
            if ipc.kind.trim().is_empty() || ipc.target.trim().is_empty() {
                return Err(PolicyError::validation(format!(
                    "ipc[{}]: kind and target are required",
                    i
                )));
            }
        }

        Ok(())
    }

    /// Rewrite `${workspace}` placeholders into `base`
    ///
    /// Glob metacharacters in `base` are escaped so the workspace only ever
    /// matches itself.
    pub fn inflate_workspace(&self, base: &str) -> Self {
        let base = ::glob::Pattern::escape(base.trim_end_matches('/'));
        let base = base.as_str();
        let mut inflated = self.clone();

        for fs in &mut inflated.filesystem {
            fs.path = fs.path.replace(WORKSPACE_PLACEHOLDER, base);
        }
        for exec in &mut inflated.executables {
            for arg in &mut exec.args {
                *arg = arg.replace(WORKSPACE_PLACEHOLDER, base);
            }
        }

        inflated
    }
}

/// Whether any `/`- or `\`-separated segment is `..`
pub fn has_traversal(path: &str) -> bool {
    path.split(|c| c == '/' || c == '\\').any(|segment| segment == "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> PermissionSet {
        PermissionSet::new().with_filesystem(FileSystemPermission::new(FsAction::Read, "/workspace/**"))
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("fs:read".parse::<FsAction>().unwrap(), FsAction::Read);
        assert_eq!("fs:list".parse::<FsAction>().unwrap(), FsAction::List);
        assert!("read".parse::<FsAction>().is_err());
        assert!("fs:delete".parse::<FsAction>().is_err());
        assert_eq!(FsAction::Write.to_string(), "fs:write");
    }

    #[test]
    fn test_valid_set() {
        assert!(minimal().validate().is_ok());

        let set = PermissionSet::new()
            .with_executable(ExecutablePermission::new("git").with_args(["status"]))
            .with_network(NetworkPermission::egress("https", "api.github.com", 443))
            .with_network(NetworkPermission::ingress("tcp", 8080))
            .with_network(NetworkPermission::dns(""))
            .with_capability(CapabilityPermission::new("CAP_NET_BIND_SERVICE"))
            .with_ipc(IpcPermission::new("unix_socket", "/run/agent/*.sock"));
        assert!(set.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_set() {
        let err = PermissionSet::new().validate().unwrap_err();
        assert!(matches!(err, PolicyError::Validation(_)));

        let network_only =
            PermissionSet::new().with_network(NetworkPermission::egress("https", "example.com", 443));
        assert!(network_only.validate().is_err());
        assert!(network_only.validate_entries().is_ok());
    }

    #[test]
    fn test_rejects_missing_path() {
        let set = PermissionSet::new().with_filesystem(FileSystemPermission::new(FsAction::Read, ""));
        let err = set.validate().unwrap_err();
        assert!(err.to_string().contains("path is required"));
    }

    #[test]
    fn test_rejects_traversal_in_path() {
        let set = PermissionSet::new()
            .with_filesystem(FileSystemPermission::new(FsAction::Read, "/workspace/../etc/**"));
        assert!(set.validate().unwrap_err().to_string().contains("traversal"));
    }

    #[test]
    fn test_rejects_unprefixed_action() {
        let mut set = minimal();
        set.filesystem[0].action = "read".into();
        assert!(set.validate().unwrap_err().to_string().contains("fs: prefix"));
    }

    #[test]
    fn test_rejects_empty_binary() {
        let set = PermissionSet::new().with_executable(ExecutablePermission::new(""));
        assert!(set.validate().unwrap_err().to_string().contains("binary is required"));
    }

    #[test]
    fn test_rejects_binary_path() {
        let set = PermissionSet::new().with_executable(ExecutablePermission::new("/usr/bin/git"));
        assert!(set.validate().unwrap_err().to_string().contains("not a path"));
    }

    #[test]
    fn test_rejects_bad_network() {
        let set = minimal().with_network(NetworkPermission::egress("https", "", 443));
        assert!(set.validate().unwrap_err().to_string().contains("egress requires a host"));

        let mut no_protocol = NetworkPermission::ingress("tcp", 22);
        no_protocol.protocol.clear();
        assert!(minimal().with_network(no_protocol).validate().is_err());

        let mut bad_direction = NetworkPermission::ingress("tcp", 22);
        bad_direction.direction = "sideways".into();
        assert!(minimal().with_network(bad_direction).validate().is_err());
    }

    #[test]
    fn test_rejects_bad_capability_and_ipc() {
        assert!(minimal()
            .with_capability(CapabilityPermission::new(" "))
            .validate()
            .is_err());
        assert!(minimal()
            .with_ipc(IpcPermission::new("dbus", ""))
            .validate()
            .is_err());
    }

    #[test]
    fn test_inflate_workspace() {
        let set = PermissionSet::new()
            .with_filesystem(FileSystemPermission::new(FsAction::Read, "${workspace}/**"))
            .with_executable(ExecutablePermission::new("cat").with_args(["${workspace}/*"]));

        let inflated = set.inflate_workspace("/srv/agent/");
        assert_eq!(inflated.filesystem[0].path, "/srv/agent/**");
        assert_eq!(inflated.executables[0].args[0], "/srv/agent/*");
        // Original untouched
        assert_eq!(set.filesystem[0].path, "${workspace}/**");
    }

    #[test]
    fn test_inflate_escapes_workspace_metacharacters() {
        let set = PermissionSet::new()
            .with_filesystem(FileSystemPermission::new(FsAction::Read, "${workspace}/*"))
            .with_filesystem(FileSystemPermission::new(FsAction::Write, "${workspace}/**"));

        let inflated = set.inflate_workspace("/srv/[ab]?");
        let flat = &inflated.filesystem[0].path;
        let deep = &inflated.filesystem[1].path;

        assert!(crate::permissions::glob_match(flat, "/srv/[ab]?/f"));
        assert!(!crate::permissions::glob_match(flat, "/srv/a/f"));
        assert!(!crate::permissions::glob_match(flat, "/srv/ax/f"));
        assert!(crate::permissions::glob_match(deep, "/srv/[ab]?/x/y"));
        assert!(!crate::permissions::glob_match(deep, "/srv/b1/x/y"));
    }

    #[test]
    fn test_deserialize_from_manifest_shape() {
        let set: PermissionSet = serde_json::from_value(serde_json::json!({
            "filesystem": [{"action": "fs:read", "path": "/workspace/**"}],
            "network": [{"direction": "egress", "protocol": "https", "host": "pypi.org", "port": 443, "hitl_required": true}]
        }))
        .unwrap();

        assert!(set.validate().is_ok());
        assert!(set.network[0].hitl_required);
        assert_eq!(set.network[0].parsed_direction(), Some(NetworkDirection::Egress));
    }

    #[test]
    fn test_has_traversal() {
        assert!(has_traversal("../etc"));
        assert!(has_traversal("/a/../b"));
        assert!(has_traversal("a\\..\\b"));
        assert!(!has_traversal("/a/..b/c"));
        assert!(!has_traversal("/a/b.."));
    }
}
