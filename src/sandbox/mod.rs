//! Sandbox runtime binding
//!
//! This module provides:
//! - `SandboxRuntime` - verifies gVisor + container backend, holds the policy
//! - `SandboxPolicy` / `NetworkRule` - what the next container may do
//! - `LaunchRequest` / `SandboxLauncher` - the launch interface consuming the policy
//! - `CommandProbe` / `SystemProbe` - bounded-time external process probes

mod policy;
mod probe;
mod runtime;

pub use policy::{LaunchOutput, LaunchRequest, NetworkRule, SandboxLauncher, SandboxPolicy};
pub use probe::{CommandProbe, ProbeOutput, SystemProbe};
pub use runtime::{
    ContainerBackend, SandboxConfig, SandboxRuntime, DEFAULT_EGRESS_NETWORK, DEFAULT_PROBE_TIMEOUT,
    NETWORK_POLICY_LABEL, SANDBOX_BINARY, SANDBOX_RUNTIME,
};

#[cfg(test)]
pub(crate) use runtime::tests::FakeProbe;
