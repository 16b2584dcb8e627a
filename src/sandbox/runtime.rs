//! Sandbox runtime binding
//!
//! Verifies that the gVisor runtime and a container backend are installed,
//! and holds the network / read-only-root policy the external launcher
//! applies to the next container invocation.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::core::{PolicyError, PolicyResult};

use super::policy::{LaunchRequest, SandboxPolicy};
use super::probe::{CommandProbe, SystemProbe};

/// Sandbox technology identifier manifests must name in `spec.runtime`
pub const SANDBOX_RUNTIME: &str = "gvisor";

/// Binary implementing the sandbox runtime
pub const SANDBOX_BINARY: &str = "runsc";

/// Upper bound for a single verification probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Isolated network containers join when the policy allows egress
pub const DEFAULT_EGRESS_NETWORK: &str = "shadow-egress";

/// Container label carrying the JSON network allow-list
pub const NETWORK_POLICY_LABEL: &str = "io.shadow.network-policy";

/// Mount point of the workspace inside the container
const CONTAINER_WORKDIR: &str = "/workspace";

/// Supported container backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerBackend {
    #[default]
    Docker,
    Podman,
    Containerd,
}

impl ContainerBackend {
    /// CLI used to drive the backend
    pub fn binary(&self) -> &'static str {
        match self {
            ContainerBackend::Docker => "docker",
            ContainerBackend::Podman => "podman",
            ContainerBackend::Containerd => "ctr",
        }
    }

    /// Arguments for the lightweight liveness probe
    pub fn probe_args(&self) -> &'static [&'static str] {
        match self {
            ContainerBackend::Docker => &["version", "--format", "{{.Server.Version}}"],
            ContainerBackend::Podman => &["version", "--format", "{{.Client.Version}}"],
            ContainerBackend::Containerd => &["version"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerBackend::Docker => "docker",
            ContainerBackend::Podman => "podman",
            ContainerBackend::Containerd => "containerd",
        }
    }
}

impl fmt::Display for ContainerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerBackend {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(ContainerBackend::Docker),
            "podman" => Ok(ContainerBackend::Podman),
            "containerd" | "ctr" => Ok(ContainerBackend::Containerd),
            other => Err(PolicyError::validation(format!(
                "unsupported container backend '{}' (expected docker, podman or containerd)",
                other
            ))),
        }
    }
}

/// Sandbox runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Sandbox binary name or absolute path
    pub binary: String,
    pub backend: ContainerBackend,
    pub probe_timeout: Duration,
    /// Expected platform label in the version output
    pub platform: Option<String>,
    /// Backend network joined when egress rules exist; the launcher filters
    /// it down to the labelled allow-list
    pub egress_network: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            binary: SANDBOX_BINARY.to_string(),
            backend: ContainerBackend::default(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            platform: None,
            egress_network: DEFAULT_EGRESS_NETWORK.to_string(),
        }
    }
}

impl SandboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `SHADOW_SANDBOX_BINARY`, `SHADOW_SANDBOX_BACKEND`,
    /// `SHADOW_SANDBOX_PLATFORM` and `SHADOW_SANDBOX_EGRESS_NETWORK`
    pub fn from_env() -> PolicyResult<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> PolicyResult<Self> {
        let mut config = Self::default();

        if let Some(binary) = lookup("SHADOW_SANDBOX_BINARY").filter(|v| !v.is_empty()) {
            config.binary = binary;
        }
        if let Some(backend) = lookup("SHADOW_SANDBOX_BACKEND").filter(|v| !v.is_empty()) {
            config.backend = backend.parse()?;
        }
        config.platform = lookup("SHADOW_SANDBOX_PLATFORM").filter(|v| !v.is_empty());
        if let Some(network) = lookup("SHADOW_SANDBOX_EGRESS_NETWORK").filter(|v| !v.is_empty()) {
            config.egress_network = network;
        }

        Ok(config)
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_backend(mut self, backend: ContainerBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_egress_network(mut self, network: impl Into<String>) -> Self {
        self.egress_network = network.into();
        self
    }
}

/// Handle on the external sandbox technology
pub struct SandboxRuntime {
    config: SandboxConfig,
    probe: Arc<dyn CommandProbe>,
    verified: OnceCell<()>,
    policy: RwLock<SandboxPolicy>,
}

impl SandboxRuntime {
    /// Create a runtime probing the real system
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_probe(config, Arc::new(SystemProbe))
    }

    /// Create a runtime with a custom probe
    pub fn with_probe(config: SandboxConfig, probe: Arc<dyn CommandProbe>) -> Self {
        Self {
            config,
            probe,
            verified: OnceCell::new(),
            policy: RwLock::new(SandboxPolicy::default()),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Check that the sandbox binary and container backend are usable
    ///
    /// Runs the probes once; later calls return immediately after the first
    /// success. A failed verification is retried on the next call.
    pub async fn verify(&self, cancel: &CancellationToken) -> PolicyResult<()> {
        self.verified
            .get_or_try_init(|| async {
                tokio::select! {
                    result = self.run_verification() => result,
                    _ = cancel.cancelled() => Err(PolicyError::Cancelled),
                }
            })
            .await
            .map(|_| ())
    }

    /// Whether verification already succeeded
    pub fn is_verified(&self) -> bool {
        self.verified.initialized()
    }

    async fn run_verification(&self) -> PolicyResult<()> {
        let limit = self.config.probe_timeout;

        let binary = self.probe.resolve(&self.config.binary).ok_or_else(|| {
            PolicyError::sandbox(format!(
                "{} not found on PATH; install gVisor or set SHADOW_SANDBOX_BINARY",
                self.config.binary
            ))
        })?;

        let version = self.probe.run(&binary, &["--version"], limit).await?;
        if !version.success {
            return Err(PolicyError::sandbox(format!(
                "{} --version failed: {}",
                binary.display(),
                version.stderr.trim()
            )));
        }

        let text = version.combined();
        if !text.contains(SANDBOX_BINARY) {
            return Err(PolicyError::sandbox(format!(
                "{} does not look like {}: unexpected version output '{}'",
                binary.display(),
                SANDBOX_BINARY,
                text.trim()
            )));
        }

        if let Some(platform) = &self.config.platform {
            if !text.to_ascii_lowercase().contains(&platform.to_ascii_lowercase()) {
                tracing::warn!(
                    "[SandboxRuntime] Platform '{}' not reported by {} (continuing)",
                    platform,
                    binary.display()
                );
            }
        }

        let backend_binary = self.config.backend.binary();
        let backend = self.probe.resolve(backend_binary).ok_or_else(|| {
            PolicyError::sandbox(format!(
                "container backend {} not installed ({} not found on PATH)",
                self.config.backend, backend_binary
            ))
        })?;

        let status = self
            .probe
            .run(&backend, self.config.backend.probe_args(), limit)
            .await?;
        if !status.success {
            return Err(PolicyError::sandbox(format!(
                "container backend {} is not responding: {}",
                self.config.backend,
                status.stderr.trim()
            )));
        }

        tracing::info!(
            "[SandboxRuntime] Verified {} with {} backend",
            binary.display(),
            self.config.backend
        );
        Ok(())
    }

    /// Replace the policy applied to the next container invocation
    ///
    /// Running workloads are not affected.
    pub fn enforce_policy(&self, policy: SandboxPolicy) {
        tracing::debug!(
            "[SandboxRuntime] Enforcing {} network rule(s), readonly_root={}",
            policy.network_rules.len(),
            policy.readonly_root
        );
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    /// Policy most recently enforced
    pub fn policy(&self) -> SandboxPolicy {
        self.policy.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Backend argv for running `request` in `image` under the current policy
    ///
    /// The first element is the backend binary. The container never shares
    /// the host network: without egress rules it gets no network, otherwise
    /// it joins the isolated egress network and the allow-list travels as
    /// the [`NETWORK_POLICY_LABEL`] label.
    pub fn compose_invocation(&self, image: &str, request: &LaunchRequest) -> PolicyResult<Vec<String>> {
        let policy = self.policy();
        let backend = self.config.backend;
        let workdir = request.workdir.display().to_string();
        let policy_label = format!(
            "{}={}",
            NETWORK_POLICY_LABEL,
            serde_json::to_string(&policy.network_rules)?
        );

        let mut env: Vec<(&String, &String)> = request.env.iter().collect();
        env.sort();

        let mut argv = vec![backend.binary().to_string(), "run".to_string(), "--rm".to_string()];

        match backend {
            ContainerBackend::Docker | ContainerBackend::Podman => {
                if request.stdin.is_some() {
                    argv.push("-i".to_string());
                }
                argv.push(format!("--runtime={}", SANDBOX_BINARY));
                if policy.readonly_root {
                    argv.push("--read-only".to_string());
                }
                if policy.allows_egress() {
                    argv.push(format!("--network={}", self.config.egress_network));
                } else {
                    argv.push("--network=none".to_string());
                }
                argv.push("--label".to_string());
                argv.push(policy_label);

                let mode = if policy.readonly_root { ":ro" } else { "" };
                argv.push("-v".to_string());
                argv.push(format!("{}:{}{}", workdir, CONTAINER_WORKDIR, mode));
                argv.push("-w".to_string());
                argv.push(CONTAINER_WORKDIR.to_string());

                for (key, value) in env {
                    argv.push("-e".to_string());
                    argv.push(format!("{}={}", key, value));
                }

                argv.push(image.to_string());
            }
            ContainerBackend::Containerd => {
                argv.push("--runtime".to_string());
                argv.push(format!("io.containerd.{}.v1", SANDBOX_BINARY));
                if policy.readonly_root {
                    argv.push("--readonly".to_string());
                }
                // CNI attaches the configured egress network; without it the
                // task only has loopback
                if policy.allows_egress() {
                    argv.push("--cni".to_string());
                }
                argv.push("--label".to_string());
                argv.push(policy_label);

                let options = if policy.readonly_root { "rbind:ro" } else { "rbind:rw" };
                argv.push("--mount".to_string());
                argv.push(format!(
                    "type=bind,src={},dst={},options={}",
                    workdir, CONTAINER_WORKDIR, options
                ));
                argv.push("--cwd".to_string());
                argv.push(CONTAINER_WORKDIR.to_string());

                for (key, value) in env {
                    argv.push("--env".to_string());
                    argv.push(format!("{}={}", key, value));
                }

                argv.push(image.to_string());
                argv.push(format!("shadow-{}", uuid::Uuid::new_v4()));
            }
        }

        argv.extend(request.args.iter().cloned());
        Ok(argv)
    }
}

impl fmt::Debug for SandboxRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxRuntime")
            .field("config", &self.config)
            .field("verified", &self.is_verified())
            .finish()
    }
}
