//! Agent registration - composes the policy subsystem for one agent
//!
//! `register_agent` validates the manifest, verifies the sandbox, builds the
//! audit logger, HITL broker and permission manager, wires the sandbox into
//! the manager and installs the manager into the tool registry. The returned
//! `AgentRegistration` is the handle the rest of the runtime uses.
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = RegistrationConfig::new(manifest, "/srv/agents/coder")
//!     .with_hitl_timeout(Duration::from_secs(120))
//!     .with_tool(ReadFileTool);
//!
//! let agent = register_agent(&cancel, config).await?;
//! let ctx = agent.context();
//! let result = agent.execute(&ctx, "read_file", &json!({"path": "README.md"})).await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditFilter, AuditLogger, AuditRecord, AuditResult, PermissionType};
use crate::core::{AuthContext, PolicyResult};
use crate::hitl::{HitlBroker, DEFAULT_HITL_TIMEOUT};
use crate::permissions::{AgentManifest, GrantScope, PermissionGrant, PermissionManager};
use crate::sandbox::{CommandProbe, LaunchRequest, SandboxConfig, SandboxRuntime};
use crate::tools::{Tool, ToolRegistry, ToolResult};

/// Inputs for [`register_agent`]
pub struct RegistrationConfig {
    pub manifest: AgentManifest,
    /// Workspace root; `${workspace}` resolves here
    pub workspace: PathBuf,
    pub hitl_timeout: Duration,
    /// Route HITL-gated permissions through the broker (default true)
    pub attach_hitl: bool,
    pub sandbox: SandboxConfig,
    /// Probe override, mainly for tests
    pub probe: Option<Arc<dyn CommandProbe>>,
    pub tools: ToolRegistry,
}

impl RegistrationConfig {
    pub fn new(manifest: AgentManifest, workspace: impl Into<PathBuf>) -> Self {
        Self {
            manifest,
            workspace: workspace.into(),
            hitl_timeout: DEFAULT_HITL_TIMEOUT,
            attach_hitl: true,
            sandbox: SandboxConfig::default(),
            probe: None,
            tools: ToolRegistry::new(),
        }
    }

    pub fn with_hitl_timeout(mut self, timeout: Duration) -> Self {
        self.hitl_timeout = timeout;
        self
    }

    /// Deny HITL-gated permissions instead of asking
    pub fn without_hitl(mut self) -> Self {
        self.attach_hitl = false;
        self
    }

    pub fn with_sandbox_config(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn CommandProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }
}

/// Validate, verify and wire up the policy subsystem for one agent
///
/// Fails if the manifest is invalid or the sandbox cannot be verified; an
/// agent never runs without its declared isolation.
pub async fn register_agent(
    cancel: &CancellationToken,
    config: RegistrationConfig,
) -> PolicyResult<AgentRegistration> {
    let RegistrationConfig {
        manifest,
        workspace,
        hitl_timeout,
        attach_hitl,
        sandbox,
        probe,
        tools,
    } = config;

    if let Err(e) = manifest.validate() {
        tracing::error!("[Registration] Invalid manifest for '{}': {}", manifest.name(), e);
        return Err(e);
    }

    let sandbox = Arc::new(match probe {
        Some(probe) => SandboxRuntime::with_probe(sandbox, probe),
        None => SandboxRuntime::new(sandbox),
    });
    if let Err(e) = sandbox.verify(cancel).await {
        tracing::error!("[Registration] Sandbox verification failed for '{}': {}", manifest.name(), e);
        return Err(e);
    }

    let broker = Arc::new(HitlBroker::with_timeout(hitl_timeout));
    let audit = Arc::new(AuditLogger::from_spec(&manifest.spec.audit));

    let mut manager = PermissionManager::new(&workspace, manifest.spec.permissions.clone(), audit.clone())?
        .with_readonly_root(manifest.spec.security.read_only_root);
    if attach_hitl {
        manager = manager.with_hitl(broker.clone());
    }
    let manager = Arc::new(manager);
    manager.attach_sandbox(sandbox.clone());

    tools.set_permission_manager(manager.clone());

    tracing::info!(
        "[Registration] Agent '{}' registered ({} tool(s), workspace {})",
        manifest.name(),
        tools.len(),
        workspace.display()
    );

    Ok(AgentRegistration {
        manifest,
        broker,
        audit,
        manager,
        sandbox,
        tools,
    })
}

/// Composed policy handle for one registered agent
#[derive(Debug)]
pub struct AgentRegistration {
    manifest: AgentManifest,
    broker: Arc<HitlBroker>,
    audit: Arc<AuditLogger>,
    manager: Arc<PermissionManager>,
    sandbox: Arc<SandboxRuntime>,
    tools: ToolRegistry,
}

impl AgentRegistration {
    pub fn name(&self) -> &str {
        self.manifest.name()
    }

    pub fn manifest(&self) -> &AgentManifest {
        &self.manifest
    }

    /// Fresh auth context for this agent
    pub fn context(&self) -> AuthContext {
        AuthContext::new(self.name())
    }

    /// Run a tool through the permission subsystem
    pub async fn execute(
        &self,
        auth: &AuthContext,
        tool: &str,
        input: &Value,
    ) -> PolicyResult<ToolResult> {
        self.tools.execute(auth, tool, input).await
    }

    /// Audit records matching `filter`
    pub fn query_audit(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        self.audit.query(filter)
    }

    /// Operator override: install a grant without a HITL round-trip
    pub fn grant_permission(
        &self,
        action: &str,
        resource: &str,
        scope: GrantScope,
        approver: &str,
        ttl: Option<chrono::Duration>,
    ) -> PermissionGrant {
        let grant = HitlBroker::grant_manual(action, resource, scope, approver, ttl);
        self.manager.add_grant(grant.clone());

        let mut record = AuditRecord::new(
            self.name(),
            action,
            PermissionType::Grant,
            resource,
            AuditResult::Granted,
        )
        .with_correlation_id(&grant.id);
        if self.audit.is_verbose() {
            record = record
                .with_metadata("approver", json!(approver))
                .with_metadata("scope", json!(scope));
        }
        self.audit.log(record);

        grant
    }

    /// Backend argv for launching `request` in this agent's image
    pub fn compose_invocation(&self, request: &LaunchRequest) -> PolicyResult<Vec<String>> {
        self.sandbox
            .compose_invocation(&self.manifest.spec.image, request)
    }

    pub fn broker(&self) -> &Arc<HitlBroker> {
        &self.broker
    }

    pub fn manager(&self) -> &Arc<PermissionManager> {
        &self.manager
    }

    pub fn sandbox(&self) -> &Arc<SandboxRuntime> {
        &self.sandbox
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }
}
