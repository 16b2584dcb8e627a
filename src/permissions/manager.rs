//! Permission manager - the authorization engine
//!
//! Matches runtime requests against an agent's declared `PermissionSet`.
//! Declared data is immutable after construction, so every read path is lock
//! free. The only shared mutable state is the grant cache and the cumulative
//! network rule list, each behind a short-held mutex that is never kept
//! across a HITL round-trip. Concurrent checks needing the same grant queue
//! on a per-key async lock so only one of them prompts.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde_json::{json, Value};

use crate::audit::{AuditLogger, AuditRecord, AuditResult, PermissionType};
use crate::core::{AuthContext, DenialReason, PolicyError, PolicyResult};
use crate::hitl::{HitlProvider, PermissionRequest, RiskLevel};
use crate::sandbox::{NetworkRule, SandboxPolicy, SandboxRuntime};

use super::glob::{glob_match, segment_match};
use super::grant::{grant_key, GrantScope, PermissionGrant};
use super::model::{
    ExecutablePermission, FileSystemPermission, FsAction, NetworkDirection, NetworkPermission,
    PermissionSet,
};
use super::path::{normalize_path, PathError};

const GLOB_META: &[char] = &['*', '?', '['];

/// Authorization engine for one agent
pub struct PermissionManager {
    /// Workspace root; relative paths resolve against it
    base_path: PathBuf,
    /// Declared permissions, workspace placeholders already inflated
    permissions: PermissionSet,
    audit: Arc<AuditLogger>,
    hitl: Option<Arc<dyn HitlProvider>>,
    sandbox: RwLock<Option<Arc<SandboxRuntime>>>,
    readonly_root: bool,
    /// Cached grants keyed by `action:resource`
    grants: Mutex<HashMap<String, PermissionGrant>>,
    /// Declared egress plus every endpoint approved so far
    network_rules: Mutex<Vec<NetworkRule>>,
    /// HITL escalations in flight, keyed like `grants`
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PermissionManager {
    /// Validate `permissions` and build a manager rooted at `base_path`
    pub fn new(
        base_path: impl Into<PathBuf>,
        permissions: PermissionSet,
        audit: Arc<AuditLogger>,
    ) -> PolicyResult<Self> {
        permissions.validate()?;

        let base_path = base_path.into();
        let permissions = permissions.inflate_workspace(&base_path.to_string_lossy());

        let declared_egress: Vec<NetworkRule> = permissions
            .network
            .iter()
            .filter(|p| !p.hitl_required)
            .filter(|p| p.parsed_direction() == Some(NetworkDirection::Egress))
            .filter_map(NetworkRule::from_permission)
            .fold(Vec::new(), |mut rules, rule| {
                if !rules.contains(&rule) {
                    rules.push(rule);
                }
                rules
            });

        tracing::debug!(
            "[PermissionManager] Created for {} ({} fs, {} exec, {} net rules)",
            base_path.display(),
            permissions.filesystem.len(),
            permissions.executables.len(),
            permissions.network.len()
        );

        Ok(Self {
            base_path,
            permissions,
            audit,
            hitl: None,
            sandbox: RwLock::new(None),
            readonly_root: true,
            grants: Mutex::new(HashMap::new()),
            network_rules: Mutex::new(declared_egress),
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Route HITL-gated permissions through `provider`
    pub fn with_hitl(mut self, provider: Arc<dyn HitlProvider>) -> Self {
        self.hitl = Some(provider);
        self
    }

    /// Read-only-root flag pushed to the sandbox with every policy update
    pub fn with_readonly_root(mut self, readonly_root: bool) -> Self {
        self.readonly_root = readonly_root;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Declared permissions after workspace inflation
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn has_hitl(&self) -> bool {
        self.hitl.is_some()
    }

    /// Attach a sandbox runtime and push the current network policy to it
    pub fn attach_sandbox(&self, sandbox: Arc<SandboxRuntime>) {
        *self.sandbox.write().unwrap_or_else(|e| e.into_inner()) = Some(sandbox);
        let rules = self.lock_rules();
        tracing::info!(
            "[PermissionManager] Sandbox attached, pushing {} declared network rule(s)",
            rules.len()
        );
        self.push_policy(&rules);
    }

    /// Currently attached sandbox runtime
    pub fn sandbox(&self) -> Option<Arc<SandboxRuntime>> {
        self.sandbox.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Cumulative network rules (declared egress plus approved endpoints)
    pub fn network_rules(&self) -> Vec<NetworkRule> {
        self.lock_rules().clone()
    }

    // ========================================================================
    // Tool-level subset check
    // ========================================================================

    /// Assert that a tool's requirements fit inside the agent's envelope
    ///
    /// The tool's own set is validated first, then every filesystem,
    /// executable, network, capability and IPC requirement must be covered
    /// by a declared permission. The denial names the first requirement that
    /// exceeds scope.
    pub fn authorize_tool(
        &self,
        ctx: &AuthContext,
        tool_name: &str,
        required: &PermissionSet,
        args: &Value,
    ) -> PolicyResult<()> {
        if let Err(e) = required.validate_entries() {
            let msg = match e {
                PolicyError::Validation(msg) => msg,
                other => other.to_string(),
            };
            self.record(
                ctx,
                PermissionType::Tool,
                "tool",
                tool_name,
                AuditResult::Denied,
                Some(msg.clone()),
                vec![],
            );
            return Err(PolicyError::validation(format!(
                "tool '{}' declares invalid permissions: {}",
                tool_name, msg
            )));
        }

        let required = required.inflate_workspace(&self.base_path.to_string_lossy());

        if let Some(requirement) = self.first_uncovered(&required) {
            let descriptor = format!("tool {} requires {}", tool_name, requirement);
            let reason = DenialReason::ExceedsAgentPermissions;
            self.record(
                ctx,
                PermissionType::Tool,
                "tool",
                tool_name,
                AuditResult::Denied,
                Some(format!("requires {}: {}", requirement, reason)),
                vec![("args", args.clone())],
            );
            tracing::warn!(
                "[PermissionManager] Agent {} denied tool {}: {} {}",
                ctx.agent_id,
                tool_name,
                requirement,
                reason
            );
            return Err(PolicyError::denied(descriptor, reason));
        }

        self.record(
            ctx,
            PermissionType::Tool,
            "tool",
            tool_name,
            AuditResult::ToolAllowed,
            None,
            vec![("args", args.clone())],
        );
        Ok(())
    }

    fn first_uncovered(&self, required: &PermissionSet) -> Option<String> {
        let declared = &self.permissions;

        for fs in &required.filesystem {
            let covered = declared
                .filesystem
                .iter()
                .any(|d| d.action == fs.action && pattern_covers(&d.path, &fs.path));
            if !covered {
                return Some(format!("{} {}", fs.action, fs.path));
            }
        }

        for exec in &required.executables {
            if !declared.executables.iter().any(|d| exec_covers(d, exec)) {
                return Some(format!("exec {}", exec.binary));
            }
        }

        for net in &required.network {
            if !declared.network.iter().any(|d| network_covers(d, net)) {
                let endpoint = if net.port == 0 {
                    net.host.clone()
                } else {
                    format!("{}:{}", net.host, net.port)
                };
                return Some(format!("net:{} {} {}", net.direction, net.protocol, endpoint));
            }
        }

        for cap in &required.capabilities {
            if !declared.capabilities.iter().any(|d| d.capability == cap.capability) {
                return Some(format!("capability {}", cap.capability));
            }
        }

        for ipc in &required.ipc {
            let covered = declared
                .ipc
                .iter()
                .any(|d| d.kind == ipc.kind && pattern_covers(&d.target, &ipc.target));
            if !covered {
                return Some(format!("ipc:{} {}", ipc.kind, ipc.target));
            }
        }

        None
    }

    // ========================================================================
    // Concrete checks
    // ========================================================================

    /// Authorize a filesystem action, returning the normalized path
    pub async fn check_file_access(
        &self,
        ctx: &AuthContext,
        action: FsAction,
        path: &str,
    ) -> PolicyResult<String> {
        let action_str = action.as_str();

        let normalized = match normalize_path(&self.base_path, path) {
            Ok(normalized) => normalized,
            Err(PathError::Traversal) => {
                return Err(self.deny(
                    ctx,
                    PermissionType::Filesystem,
                    action_str,
                    path,
                    DenialReason::PathTraversal,
                    vec![],
                ))
            }
            Err(PathError::Empty) => {
                return Err(self.deny(
                    ctx,
                    PermissionType::Filesystem,
                    action_str,
                    path,
                    DenialReason::NotDeclared,
                    vec![],
                ))
            }
        };

        let matched: Option<&FileSystemPermission> = self
            .permissions
            .filesystem
            .iter()
            .find(|p| p.action == action_str && glob_match(&p.path, &normalized));

        let Some(permission) = matched else {
            return Err(self.deny(
                ctx,
                PermissionType::Filesystem,
                action_str,
                &normalized,
                DenialReason::NotDeclared,
                vec![],
            ));
        };

        if permission.hitl_required {
            let risk = match action {
                FsAction::Read | FsAction::List => RiskLevel::Low,
                FsAction::Write => RiskLevel::Medium,
                FsAction::Execute => RiskLevel::High,
            };
            self.ensure_grant(
                ctx,
                PermissionType::Filesystem,
                action_str,
                &normalized,
                &permission.justification,
                risk,
            )
            .await?;
        }

        self.grant(
            ctx,
            PermissionType::Filesystem,
            action_str,
            &normalized,
            vec![("requested_path", json!(path))],
        );
        Ok(normalized)
    }

    /// Authorize running `binary` with `args` and `env`
    ///
    /// The binary must match by exact name. Restricted argument lists match
    /// position by position and must have the same length as the actual
    /// arguments: `*` matches any argument, a trailing `*` matches any
    /// suffix, other glob patterns use the glob matcher, anything else is
    /// exact. Every environment variable must match some `KEY=VALUE`,
    /// `KEY=*` or bare `KEY` pattern.
    pub async fn check_executable(
        &self,
        ctx: &AuthContext,
        binary: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> PolicyResult<()> {
        let metadata = || {
            let mut keys: Vec<&String> = env.keys().collect();
            keys.sort();
            vec![("args", json!(args)), ("env", json!(keys))]
        };

        let candidates: Vec<&ExecutablePermission> = self
            .permissions
            .executables
            .iter()
            .filter(|p| p.binary == binary)
            .collect();

        if candidates.is_empty() {
            return Err(self.deny(
                ctx,
                PermissionType::Executable,
                "exec",
                binary,
                DenialReason::NotDeclared,
                metadata(),
            ));
        }

        let Some(permission) = candidates
            .into_iter()
            .find(|p| args_match(&p.args, args) && env_match(&p.env, env))
        else {
            return Err(self.deny(
                ctx,
                PermissionType::Executable,
                "exec",
                binary,
                DenialReason::ArgumentsRejected,
                metadata(),
            ));
        };

        if permission.hitl_required {
            self.ensure_grant(
                ctx,
                PermissionType::Executable,
                "exec",
                binary,
                "",
                RiskLevel::High,
            )
            .await?;
        }

        self.grant(ctx, PermissionType::Executable, "exec", binary, metadata());
        Ok(())
    }

    /// Authorize a network connection and sync the sandbox policy
    ///
    /// On success the concrete endpoint joins the cumulative rule list and
    /// the whole list is re-pushed to the attached sandbox.
    pub async fn check_network(
        &self,
        ctx: &AuthContext,
        direction: NetworkDirection,
        protocol: &str,
        host: &str,
        port: u16,
    ) -> PolicyResult<()> {
        let action = format!("net:{}", direction);
        let rule = NetworkRule::new(direction, protocol.to_ascii_lowercase(), host, port);
        let endpoint = rule.endpoint();

        let matched: Option<&NetworkPermission> = self
            .permissions
            .network
            .iter()
            .find(|p| network_matches(p, direction, protocol, host, port));

        let Some(permission) = matched else {
            return Err(self.deny(
                ctx,
                PermissionType::Network,
                &action,
                &endpoint,
                DenialReason::NotDeclared,
                vec![("protocol", json!(protocol))],
            ));
        };

        if permission.hitl_required {
            self.ensure_grant(
                ctx,
                PermissionType::Network,
                &action,
                &endpoint,
                "",
                RiskLevel::Medium,
            )
            .await?;
        }

        {
            let mut rules = self.lock_rules();
            if !rules.contains(&rule) {
                rules.push(rule);
            }
            self.push_policy(&rules);
        }

        self.grant(
            ctx,
            PermissionType::Network,
            &action,
            &endpoint,
            vec![("protocol", json!(protocol))],
        );
        Ok(())
    }

    /// Authorize use of a named capability
    pub async fn check_capability(&self, ctx: &AuthContext, capability: &str) -> PolicyResult<()> {
        let Some(permission) = self
            .permissions
            .capabilities
            .iter()
            .find(|p| p.capability == capability)
        else {
            return Err(self.deny(
                ctx,
                PermissionType::Capability,
                "capability",
                capability,
                DenialReason::NotDeclared,
                vec![],
            ));
        };

        if permission.hitl_required {
            self.ensure_grant(
                ctx,
                PermissionType::Capability,
                "capability",
                capability,
                &permission.justification,
                RiskLevel::High,
            )
            .await?;
        }

        self.grant(ctx, PermissionType::Capability, "capability", capability, vec![]);
        Ok(())
    }

    /// Authorize an IPC channel of `kind` to `target`
    pub async fn check_ipc(&self, ctx: &AuthContext, kind: &str, target: &str) -> PolicyResult<()> {
        let action = format!("ipc:{}", kind);

        let Some(permission) = self
            .permissions
            .ipc
            .iter()
            .find(|p| p.kind == kind && (p.target == target || glob_match(&p.target, target)))
        else {
            return Err(self.deny(
                ctx,
                PermissionType::Ipc,
                &action,
                target,
                DenialReason::NotDeclared,
                vec![],
            ));
        };

        if permission.hitl_required {
            self.ensure_grant(ctx, PermissionType::Ipc, &action, target, "", RiskLevel::Medium)
                .await?;
        }

        self.grant(ctx, PermissionType::Ipc, &action, target, vec![]);
        Ok(())
    }

    // ========================================================================
    // Grants
    // ========================================================================

    /// Install a grant, replacing any grant for the same action and resource
    pub fn add_grant(&self, grant: PermissionGrant) {
        tracing::info!(
            "[PermissionManager] Grant {} installed for {} ({} scope)",
            grant.id,
            grant.descriptor(),
            grant.scope
        );
        self.lock_grants().insert(grant.key(), grant);
    }

    /// Drop expired grants, returning how many were removed
    pub fn purge_expired_grants(&self) -> usize {
        let now = chrono::Utc::now();
        let mut grants = self.lock_grants();
        let before = grants.len();
        grants.retain(|_, g| !g.is_expired_at(now));
        before - grants.len()
    }

    /// Snapshot of cached grants
    pub fn grants(&self) -> Vec<PermissionGrant> {
        self.lock_grants().values().cloned().collect()
    }

    /// Satisfy a HITL-gated permission from the cache or a fresh approval
    ///
    /// The cache lock is released before waiting on the provider.
    async fn ensure_grant(
        &self,
        ctx: &AuthContext,
        permission_type: PermissionType,
        action: &str,
        resource: &str,
        justification: &str,
        risk: RiskLevel,
    ) -> PolicyResult<()> {
        let key = grant_key(action, resource);

        if self.take_cached_grant(&key) {
            tracing::debug!("[PermissionManager] Reusing cached grant for {}", key);
            return Ok(());
        }

        let Some(provider) = self.hitl.clone() else {
            return Err(self.deny(
                ctx,
                permission_type,
                action,
                resource,
                DenialReason::HitlRequired,
                vec![],
            ));
        };

        let request = PermissionRequest::new(&ctx.agent_id, action, resource)
            .with_justification(justification)
            .with_risk(risk);

        let slot = self.inflight_slot(&key);
        let result = tokio::select! {
            _guard = slot.lock() => {
                // An earlier escalation for the same key may have cached a grant
                if self.take_cached_grant(&key) {
                    tracing::debug!("[PermissionManager] Grant for {} arrived while queued", key);
                    Ok(())
                } else {
                    self.escalate(ctx, provider.as_ref(), permission_type, request).await
                }
            }
            _ = ctx.cancel.cancelled() => {
                self.record(
                    ctx,
                    permission_type,
                    action,
                    resource,
                    AuditResult::Denied,
                    Some(PolicyError::Cancelled.to_string()),
                    vec![],
                );
                Err(PolicyError::Cancelled)
            }
        };
        self.release_inflight_slot(&key, slot);
        result
    }

    /// Ask the provider and cache the resulting grant
    async fn escalate(
        &self,
        ctx: &AuthContext,
        provider: &dyn HitlProvider,
        permission_type: PermissionType,
        request: PermissionRequest,
    ) -> PolicyResult<()> {
        let action = request.action.clone();
        let resource = request.resource.clone();

        match provider.request_permission(&ctx.cancel, request).await {
            Ok(grant) => {
                if grant.scope != GrantScope::OneTime && !grant.is_expired() {
                    self.lock_grants().insert(grant_key(&action, &resource), grant);
                }
                Ok(())
            }
            Err(e) => {
                let reason = match e.denial() {
                    Some(denial) => denial.reason.to_string(),
                    None => e.to_string(),
                };
                self.record(
                    ctx,
                    permission_type,
                    &action,
                    &resource,
                    AuditResult::Denied,
                    Some(reason),
                    vec![],
                );
                Err(e)
            }
        }
    }

    fn inflight_slot(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Drop the slot once no other check holds or waits on it
    fn release_inflight_slot(&self, key: &str, slot: Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one in `slot`
        if Arc::strong_count(&slot) == 2 {
            inflight.remove(key);
        }
    }

    /// Whether a usable grant exists; expired grants are evicted and
    /// one-time grants are consumed
    fn take_cached_grant(&self, key: &str) -> bool {
        let mut grants = self.lock_grants();
        let Some(grant) = grants.get(key) else {
            return false;
        };

        if grant.is_expired() {
            grants.remove(key);
            return false;
        }
        if grant.scope == GrantScope::OneTime {
            grants.remove(key);
        }
        true
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn push_policy(&self, rules: &[NetworkRule]) {
        if let Some(sandbox) = self.sandbox() {
            sandbox.enforce_policy(SandboxPolicy::new(rules.to_vec(), self.readonly_root));
        }
    }

    fn grant(
        &self,
        ctx: &AuthContext,
        permission_type: PermissionType,
        action: &str,
        resource: &str,
        metadata: Vec<(&str, Value)>,
    ) {
        tracing::debug!(
            "[PermissionManager] Agent {} granted {} {}",
            ctx.agent_id,
            action,
            resource
        );
        self.record(
            ctx,
            permission_type,
            action,
            resource,
            AuditResult::Granted,
            None,
            metadata,
        );
    }

    fn deny(
        &self,
        ctx: &AuthContext,
        permission_type: PermissionType,
        action: &str,
        resource: &str,
        reason: DenialReason,
        metadata: Vec<(&str, Value)>,
    ) -> PolicyError {
        tracing::warn!(
            "[PermissionManager] Agent {} denied {} {}: {}",
            ctx.agent_id,
            action,
            resource,
            reason
        );
        self.record(
            ctx,
            permission_type,
            action,
            resource,
            AuditResult::Denied,
            Some(reason.to_string()),
            metadata,
        );
        PolicyError::denied(format!("{} {}", action, resource), reason)
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        ctx: &AuthContext,
        permission_type: PermissionType,
        action: &str,
        resource: &str,
        result: AuditResult,
        reason: Option<String>,
        metadata: Vec<(&str, Value)>,
    ) {
        let mut record = AuditRecord::new(&ctx.agent_id, action, permission_type, resource, result)
            .with_correlation_id(&ctx.correlation_id);
        if let Some(reason) = reason {
            record = record.with_reason(reason);
        }
        if self.audit.is_verbose() {
            for (key, value) in metadata {
                record = record.with_metadata(key, value);
            }
        }
        self.audit.log(record);
    }

    fn lock_grants(&self) -> MutexGuard<'_, HashMap<String, PermissionGrant>> {
        self.grants.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_rules(&self) -> MutexGuard<'_, Vec<NetworkRule>> {
        self.network_rules.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for PermissionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionManager")
            .field("base_path", &self.base_path)
            .field("hitl", &self.hitl.is_some())
            .field("sandbox", &self.sandbox().is_some())
            .finish()
    }
}

// ============================================================================
// Matching
// ============================================================================

/// Whether every value matched by `required` is also matched by `declared`
///
/// Compared segment by segment on `/`. A literal requirement segment is
/// matched against the declared glob; a wildcard requirement segment is
/// covered only by a declared `*` or the identical text; a `**` requirement
/// only by a declared `**` at or before its position. Anything else is
/// treated as not covered.
fn pattern_covers(declared: &str, required: &str) -> bool {
    if declared == required || declared == "**" {
        return true;
    }
    let declared: Vec<&str> = declared.split('/').collect();
    let required: Vec<&str> = required.split('/').collect();
    segments_cover(&declared, &required)
}

fn segments_cover(declared: &[&str], required: &[&str]) -> bool {
    match (declared.split_first(), required.split_first()) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        // A declared `**` spans one or more segments
        (Some((&"**", rest)), Some(_)) => {
            (1..=required.len()).any(|taken| segments_cover(rest, &required[taken..]))
        }
        (Some((d, d_rest)), Some((r, r_rest))) => {
            segment_covers(d, r) && segments_cover(d_rest, r_rest)
        }
    }
}

fn segment_covers(declared: &str, required: &str) -> bool {
    if declared.contains("**") || required.contains("**") {
        return false;
    }
    if declared == required {
        return true;
    }
    if required.contains(GLOB_META) {
        return declared == "*";
    }
    segment_match(declared, required)
}

fn is_any(patterns: &[String]) -> bool {
    patterns.is_empty() || (patterns.len() == 1 && patterns[0] == "*")
}

fn exec_covers(declared: &ExecutablePermission, required: &ExecutablePermission) -> bool {
    if declared.binary != required.binary {
        return false;
    }
    let args_ok = is_any(&declared.args) || declared.args == required.args;
    let env_ok = is_any(&declared.env)
        || (!is_any(&required.env) && required.env.iter().all(|e| declared.env.contains(e)));
    args_ok && env_ok
}

fn protocol_matches(declared: &str, protocol: &str) -> bool {
    declared == "*" || declared.eq_ignore_ascii_case(protocol)
}

fn host_matches(declared: &str, host: &str) -> bool {
    declared == "*"
        || declared.eq_ignore_ascii_case(host)
        || glob_match(&declared.to_ascii_lowercase(), &host.to_ascii_lowercase())
}

fn network_matches(
    permission: &NetworkPermission,
    direction: NetworkDirection,
    protocol: &str,
    host: &str,
    port: u16,
) -> bool {
    if permission.parsed_direction() != Some(direction) {
        return false;
    }
    if !protocol_matches(&permission.protocol, protocol) {
        return false;
    }

    match direction {
        NetworkDirection::Egress => {
            host_matches(&permission.host, host) && (permission.port == 0 || permission.port == port)
        }
        NetworkDirection::Ingress => permission.port == 0 || permission.port == port,
        NetworkDirection::Dns => permission.host.is_empty() || host_matches(&permission.host, host),
    }
}

fn network_covers(declared: &NetworkPermission, required: &NetworkPermission) -> bool {
    let Some(direction) = required.parsed_direction() else {
        return false;
    };
    if declared.parsed_direction() != Some(direction) {
        return false;
    }
    if declared.protocol != "*" && !declared.protocol.eq_ignore_ascii_case(&required.protocol) {
        return false;
    }
    let port_ok = declared.port == 0 || declared.port == required.port;

    match direction {
        NetworkDirection::Egress => {
            port_ok
                && (declared.host == "*"
                    || declared.host.eq_ignore_ascii_case(&required.host)
                    || pattern_covers(
                        &declared.host.to_ascii_lowercase(),
                        &required.host.to_ascii_lowercase(),
                    ))
        }
        NetworkDirection::Ingress => port_ok,
        NetworkDirection::Dns => {
            declared.host.is_empty()
                || (!required.host.is_empty() && host_matches(&declared.host, &required.host))
        }
    }
}

fn arg_matches(pattern: &str, arg: &str) -> bool {
    if pattern == "*" || pattern == arg {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if !prefix.contains(GLOB_META) {
            return arg.starts_with(prefix);
        }
    }
    pattern.contains(GLOB_META) && glob_match(pattern, arg)
}

fn args_match(patterns: &[String], args: &[String]) -> bool {
    if is_any(patterns) {
        return true;
    }
    patterns.len() == args.len() && patterns.iter().zip(args).all(|(p, a)| arg_matches(p, a))
}

fn env_pattern_matches(pattern: &str, key: &str, value: &str) -> bool {
    match pattern.split_once('=') {
        Some((k, "*")) => k == key,
        Some((k, v)) => k == key && v == value,
        None => pattern == key,
    }
}

fn env_match(patterns: &[String], env: &HashMap<String, String>) -> bool {
    if is_any(patterns) {
        return true;
    }
    env.iter()
        .all(|(k, v)| patterns.iter().any(|p| env_pattern_matches(p, k, v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;
    use crate::audit::AuditLevel;
    use crate::hitl::{HitlBroker, PermissionDecision};
    use crate::permissions::{CapabilityPermission, IpcPermission};
    use crate::sandbox::{FakeProbe, SandboxConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Approves everything and counts how often it was asked
    struct CountingProvider {
        calls: AtomicUsize,
        scope: GrantScope,
        delay: Duration,
    }

    impl CountingProvider {
        fn new(scope: GrantScope) -> Arc<Self> {
            Self::slow(scope, Duration::ZERO)
        }

        fn slow(scope: GrantScope, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                scope,
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HitlProvider for CountingProvider {
        async fn request_permission(
            &self,
            _cancel: &CancellationToken,
            request: PermissionRequest,
        ) -> PolicyResult<PermissionGrant> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(PermissionGrant::new(
                request.action,
                request.resource,
                self.scope,
                "tester",
            ))
        }
    }

    fn workspace_read() -> PermissionSet {
        PermissionSet::new().with_filesystem(FileSystemPermission::new(
            FsAction::Read,
            "${workspace}/**",
        ))
    }

    fn manager(permissions: PermissionSet) -> PermissionManager {
        PermissionManager::new("/workspace", permissions, Arc::new(AuditLogger::new(100))).unwrap()
    }

    fn ctx() -> AuthContext {
        AuthContext::new("agent-1")
    }

    fn reason(err: &PolicyError) -> DenialReason {
        err.denial().map(|d| d.reason.clone()).expect("expected a denial")
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_rejects_invalid_set() {
        let err = PermissionManager::new(
            "/workspace",
            PermissionSet::new(),
            Arc::new(AuditLogger::default()),
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::Validation(_)));
    }

    #[test]
    fn test_workspace_is_inflated_once() {
        let m = manager(workspace_read());
        assert_eq!(m.permissions().filesystem[0].path, "/workspace/**");
    }

    #[tokio::test]
    async fn test_file_access_end_to_end() {
        let m = manager(workspace_read());
        let ctx = ctx();

        assert_eq!(
            m.check_file_access(&ctx, FsAction::Read, "/workspace/a.txt")
                .await
                .unwrap(),
            "/workspace/a.txt"
        );

        let err = m
            .check_file_access(&ctx, FsAction::Read, "/other/b.txt")
            .await
            .unwrap_err();
        assert_eq!(reason(&err), DenialReason::NotDeclared);
        assert!(err.to_string().contains("not declared"));
        assert!(err.to_string().contains("fs:read /other/b.txt"));

        let err = m
            .check_file_access(&ctx, FsAction::Write, "/workspace/a.txt")
            .await
            .unwrap_err();
        assert_eq!(reason(&err), DenialReason::NotDeclared);

        let denied = m
            .audit()
            .query(&AuditFilter::new().result(AuditResult::Denied));
        assert_eq!(denied.len(), 2);
        assert_eq!(denied[0].correlation_id, ctx.correlation_id);
    }

    #[tokio::test]
    async fn test_relative_paths_resolve_against_base() {
        let m = manager(workspace_read());
        assert_eq!(
            m.check_file_access(&ctx(), FsAction::Read, "src/./lib.rs")
                .await
                .unwrap(),
            "/workspace/src/lib.rs"
        );
    }

    #[tokio::test]
    async fn test_traversal_always_denied() {
        let m = manager(
            PermissionSet::new()
                .with_filesystem(FileSystemPermission::new(FsAction::Read, "**")),
        );

        for path in ["../etc/passwd", "/workspace/../etc/passwd", "a/../../b"] {
            let err = m
                .check_file_access(&ctx(), FsAction::Read, path)
                .await
                .unwrap_err();
            assert_eq!(reason(&err), DenialReason::PathTraversal, "{}", path);
        }
    }

    #[tokio::test]
    async fn test_hitl_required_without_provider() {
        let m = manager(
            PermissionSet::new().with_filesystem(
                FileSystemPermission::new(FsAction::Write, "/workspace/**").with_hitl(),
            ),
        );

        let err = m
            .check_file_access(&ctx(), FsAction::Write, "/workspace/out.txt")
            .await
            .unwrap_err();
        assert_eq!(reason(&err), DenialReason::HitlRequired);
        assert!(err.to_string().contains("hitl approval required"));
    }

    #[tokio::test]
    async fn test_hitl_grant_is_cached() {
        let provider = CountingProvider::new(GrantScope::Session);
        let m = manager(
            PermissionSet::new().with_filesystem(
                FileSystemPermission::new(FsAction::Write, "/workspace/**").with_hitl(),
            ),
        )
        .with_hitl(provider.clone());

        m.check_file_access(&ctx(), FsAction::Write, "/workspace/out.txt")
            .await
            .unwrap();
        assert_eq!(provider.calls(), 1);

        m.check_file_access(&ctx(), FsAction::Write, "/workspace/out.txt")
            .await
            .unwrap();
        assert_eq!(provider.calls(), 1);

        // Different resource, different grant
        m.check_file_access(&ctx(), FsAction::Write, "/workspace/other.txt")
            .await
            .unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_one_time_grants_are_not_reused() {
        let provider = CountingProvider::new(GrantScope::OneTime);
        let m = manager(
            PermissionSet::new().with_executable(ExecutablePermission::new("terraform").with_hitl()),
        )
        .with_hitl(provider.clone());

        for _ in 0..2 {
            m.check_executable(&ctx(), "terraform", &[], &HashMap::new())
                .await
                .unwrap();
        }
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_manual_and_expired_grants() {
        let m = manager(
            PermissionSet::new().with_executable(ExecutablePermission::new("terraform").with_hitl()),
        );

        m.add_grant(HitlBroker::grant_manual(
            "exec",
            "terraform",
            GrantScope::Session,
            "ops",
            None,
        ));
        m.check_executable(&ctx(), "terraform", &[], &HashMap::new())
            .await
            .unwrap();

        m.add_grant(
            PermissionGrant::new("exec", "terraform", GrantScope::Session, "ops")
                .with_expiry(Some(chrono::Utc::now() - chrono::Duration::seconds(1))),
        );
        assert_eq!(m.purge_expired_grants(), 1);
        assert!(m.grants().is_empty());

        let err = m
            .check_executable(&ctx(), "terraform", &[], &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(reason(&err), DenialReason::HitlRequired);
    }

    #[tokio::test]
    async fn test_broker_denial_and_cancellation() {
        let broker = Arc::new(HitlBroker::new());
        let m = Arc::new(
            manager(
                PermissionSet::new()
                    .with_executable(ExecutablePermission::new("git"))
                    .with_capability(CapabilityPermission::new("gpu").with_hitl()),
            )
            .with_hitl(broker.clone()),
        );

        let waiter = {
            let m = m.clone();
            tokio::spawn(async move { m.check_capability(&ctx(), "gpu").await })
        };
        let pending = loop {
            if let Some(r) = broker.pending_requests().into_iter().next() {
                break r;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(pending.action, "capability");
        assert_eq!(pending.resource, "gpu");
        broker
            .decide(PermissionDecision::deny(&pending.id, "not now"))
            .unwrap();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(reason(&err), DenialReason::DeniedByApprover("not now".into()));

        let cancelled = ctx();
        cancelled.cancel.cancel();
        let err = m.check_capability(&cancelled, "gpu").await.unwrap_err();
        assert!(err.is_escalation_failure());
        assert_eq!(broker.pending_count(), 0);

        let denied = m.audit().query(
            &AuditFilter::new()
                .permission_type(PermissionType::Capability)
                .result(AuditResult::Denied),
        );
        assert_eq!(denied.len(), 2);
    }

    #[tokio::test]
    async fn test_executable_matching() {
        let m = manager(
            PermissionSet::new()
                .with_executable(ExecutablePermission::new("ls"))
                .with_executable(
                    ExecutablePermission::new("git")
                        .with_args(["status", "--porcelain*"])
                        .with_env(["GIT_DIR=*", "LANG=C", "HOME"]),
                ),
        );
        let env = HashMap::new();

        m.check_executable(&ctx(), "ls", &strings(&["-la", "/tmp"]), &env)
            .await
            .unwrap();
        m.check_executable(&ctx(), "git", &strings(&["status", "--porcelain=v2"]), &env)
            .await
            .unwrap();

        let err = m
            .check_executable(&ctx(), "git", &strings(&["push", "--porcelain"]), &env)
            .await
            .unwrap_err();
        assert_eq!(reason(&err), DenialReason::ArgumentsRejected);

        let err = m
            .check_executable(&ctx(), "/usr/bin/git", &strings(&["status"]), &env)
            .await
            .unwrap_err();
        assert_eq!(reason(&err), DenialReason::NotDeclared);

        let ok_env: HashMap<String, String> = [
            ("GIT_DIR".to_string(), "/w/.git".to_string()),
            ("LANG".to_string(), "C".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]
        .into_iter()
        .collect();
        m.check_executable(&ctx(), "git", &strings(&["status", "--porcelain"]), &ok_env)
            .await
            .unwrap();

        let bad_env: HashMap<String, String> =
            [("LANG".to_string(), "en_US".to_string())].into_iter().collect();
        let err = m
            .check_executable(&ctx(), "git", &strings(&["status", "--porcelain"]), &bad_env)
            .await
            .unwrap_err();
        assert_eq!(reason(&err), DenialReason::ArgumentsRejected);
    }

    #[tokio::test]
    async fn test_argument_lists_must_have_equal_length() {
        let m = manager(
            PermissionSet::new()
                .with_executable(ExecutablePermission::new("cargo").with_args(["build", "--release*"])),
        );
        let env = HashMap::new();

        // Optional trailing arguments are not supported
        for args in [vec!["build"], vec!["build", "--release", "--locked"]] {
            let err = m
                .check_executable(&ctx(), "cargo", &strings(&args), &env)
                .await
                .unwrap_err();
            assert_eq!(reason(&err), DenialReason::ArgumentsRejected);
        }

        m.check_executable(&ctx(), "cargo", &strings(&["build", "--release"]), &env)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_network_matching() {
        let m = manager(
            workspace_read()
                .with_network(NetworkPermission::egress("tcp", "*.github.com", 443))
                .with_network(NetworkPermission::egress("*", "pypi.org", 0))
                .with_network(NetworkPermission::ingress("tcp", 8080))
                .with_network(NetworkPermission::dns("")),
        );
        let c = ctx();

        m.check_network(&c, NetworkDirection::Egress, "TCP", "api.github.com", 443)
            .await
            .unwrap();
        m.check_network(&c, NetworkDirection::Egress, "udp", "pypi.org", 9999)
            .await
            .unwrap();
        m.check_network(&c, NetworkDirection::Ingress, "tcp", "", 8080)
            .await
            .unwrap();
        m.check_network(&c, NetworkDirection::Dns, "udp", "anything.example", 53)
            .await
            .unwrap();

        for (direction, proto, host, port) in [
            (NetworkDirection::Egress, "tcp", "api.github.com", 80),
            (NetworkDirection::Egress, "tcp", "evil.com", 443),
            (NetworkDirection::Ingress, "tcp", "", 22),
        ] {
            let err = m
                .check_network(&c, direction, proto, host, port)
                .await
                .unwrap_err();
            assert_eq!(reason(&err), DenialReason::NotDeclared);
        }
    }

    #[tokio::test]
    async fn test_network_rules_sync_to_sandbox() {
        let m = manager(
            workspace_read()
                .with_network(NetworkPermission::egress("tcp", "pypi.org", 443))
                .with_network(NetworkPermission::egress("tcp", "*.internal", 0).with_hitl()),
        )
        .with_readonly_root(false);
        let sandbox = Arc::new(SandboxRuntime::with_probe(
            SandboxConfig::new(),
            Arc::new(FakeProbe::healthy()),
        ));

        m.attach_sandbox(sandbox.clone());
        let declared = NetworkRule::new(NetworkDirection::Egress, "tcp", "pypi.org", 443);
        let policy = sandbox.policy();
        assert_eq!(policy.network_rules, vec![declared.clone()]);
        assert!(!policy.readonly_root);

        m.add_grant(HitlBroker::grant_manual(
            "net:egress",
            "db.internal:5432",
            GrantScope::Persistent,
            "ops",
            None,
        ));
        for _ in 0..2 {
            m.check_network(&ctx(), NetworkDirection::Egress, "tcp", "db.internal", 5432)
                .await
                .unwrap();
        }

        let approved = NetworkRule::new(NetworkDirection::Egress, "tcp", "db.internal", 5432);
        let policy = sandbox.policy();
        assert!(policy.contains(&approved));
        assert!(policy.contains(&declared));
        assert_eq!(m.network_rules().len(), 2);
        assert_eq!(policy.network_rules, m.network_rules());
    }

    #[tokio::test]
    async fn test_capability_and_ipc() {
        let m = manager(
            workspace_read()
                .with_capability(CapabilityPermission::new("net_bind"))
                .with_ipc(IpcPermission::new("unix_socket", "/run/agent/*.sock")),
        );

        m.check_capability(&ctx(), "net_bind").await.unwrap();
        assert!(m.check_capability(&ctx(), "sys_admin").await.is_err());

        m.check_ipc(&ctx(), "unix_socket", "/run/agent/a.sock")
            .await
            .unwrap();
        assert!(m.check_ipc(&ctx(), "dbus", "/run/agent/a.sock").await.is_err());
        assert!(m
            .check_ipc(&ctx(), "unix_socket", "/run/agent/nested/a.sock")
            .await
            .is_err());
    }

    #[test]
    fn test_authorize_tool_subset() {
        let m = manager(
            workspace_read()
                .with_executable(ExecutablePermission::new("git"))
                .with_network(NetworkPermission::egress("tcp", "*.github.com", 443)),
        );
        let c = ctx();
        let args = json!({"path": "src/main.rs"});

        let inside = PermissionSet::new()
            .with_filesystem(FileSystemPermission::new(FsAction::Read, "${workspace}/src/**"))
            .with_executable(ExecutablePermission::new("git").with_args(["status"]))
            .with_network(NetworkPermission::egress("tcp", "api.github.com", 443));
        m.authorize_tool(&c, "reader", &inside, &args).unwrap();
        m.authorize_tool(&c, "noop", &PermissionSet::new(), &args)
            .unwrap();

        let outside = PermissionSet::new()
            .with_filesystem(FileSystemPermission::new(FsAction::Read, "/etc/**"));
        let err = m.authorize_tool(&c, "reader", &outside, &args).unwrap_err();
        assert_eq!(reason(&err), DenialReason::ExceedsAgentPermissions);
        assert!(err.to_string().contains("exceeds agent permissions"));
        assert!(err.to_string().contains("fs:read /etc/**"));

        let write = PermissionSet::new()
            .with_filesystem(FileSystemPermission::new(FsAction::Write, "/workspace/**"));
        assert!(m.authorize_tool(&c, "writer", &write, &args).is_err());

        let curl = PermissionSet::new().with_executable(ExecutablePermission::new("curl"));
        let err = m.authorize_tool(&c, "fetch", &curl, &args).unwrap_err();
        assert!(err.to_string().contains("exec curl"));

        let allowed = m.audit().query(&AuditFilter::new().result(AuditResult::ToolAllowed));
        assert_eq!(allowed.len(), 2);
    }

    #[test]
    fn test_authorize_tool_rejects_malformed_requirements() {
        let m = manager(workspace_read());
        let bad = PermissionSet::new().with_executable(ExecutablePermission::new(""));

        let err = m
            .authorize_tool(&ctx(), "broken", &bad, &Value::Null)
            .unwrap_err();
        assert!(matches!(err, PolicyError::Validation(_)));
    }

    #[test]
    fn test_pattern_covers() {
        let cases = [
            ("/workspace/**", "/workspace/src/**", true),
            ("/workspace/**", "/workspace/*.rs", true),
            ("/workspace/**", "/workspace/a/b/c.txt", true),
            ("/workspace/*", "/workspace/a*", true),
            ("/workspace/*", "/workspace/main.rs", true),
            ("/workspace/*.rs", "/workspace/*.rs", true),
            ("/workspace/**/src/*", "/workspace/**/src/*", true),
            ("/workspace/**/out", "/workspace/a/**/out", true),
            ("**", "/anything/**", true),
            ("*.io", "api.io", true),
            ("/workspace/*", "/workspace/**", false),
            ("/workspace/**", "/etc/**", false),
            ("/workspace/**", "/workspace", false),
            ("/workspace/*/src/**", "/workspace/**/src/**", false),
            ("/workspace/a?", "/workspace/a*", false),
            ("/workspace/*.rs", "/workspace/*", false),
            ("/workspace/[ab]", "/workspace/?", false),
            ("/workspace/**/out", "/workspace/**", false),
            ("?.io", "*.io", false),
            ("/run/?", "/run/*", false),
        ];

        for (declared, required, expected) in cases {
            assert_eq!(
                pattern_covers(declared, required),
                expected,
                "declared={} required={}",
                declared,
                required
            );
        }
    }

    #[test]
    fn test_authorize_tool_rejects_wider_wildcards() {
        let m = manager(
            PermissionSet::new()
                .with_filesystem(FileSystemPermission::new(FsAction::Read, "/workspace/*/src/**"))
                .with_filesystem(FileSystemPermission::new(FsAction::Write, "/workspace/a?"))
                .with_network(NetworkPermission::egress("tcp", "?.io", 443))
                .with_ipc(IpcPermission::new("unix_socket", "/run/?")),
        );
        let c = ctx();

        let wider = [
            PermissionSet::new()
                .with_filesystem(FileSystemPermission::new(FsAction::Read, "/workspace/**/src/**")),
            PermissionSet::new()
                .with_filesystem(FileSystemPermission::new(FsAction::Write, "/workspace/a*")),
            PermissionSet::new().with_network(NetworkPermission::egress("tcp", "*.io", 443)),
            PermissionSet::new().with_ipc(IpcPermission::new("unix_socket", "/run/*")),
        ];
        for required in &wider {
            let err = m.authorize_tool(&c, "greedy", required, &Value::Null).unwrap_err();
            assert_eq!(reason(&err), DenialReason::ExceedsAgentPermissions, "{:?}", required);
        }

        let narrower = PermissionSet::new()
            .with_filesystem(FileSystemPermission::new(FsAction::Read, "/workspace/app/src/*.rs"))
            .with_filesystem(FileSystemPermission::new(FsAction::Write, "/workspace/ab"))
            .with_network(NetworkPermission::egress("tcp", "x.io", 443))
            .with_ipc(IpcPermission::new("unix_socket", "/run/s"));
        m.authorize_tool(&c, "modest", &narrower, &Value::Null).unwrap();
    }

    #[tokio::test]
    async fn test_workspace_metacharacters_stay_literal() {
        let m = PermissionManager::new(
            "/srv/[ab]",
            PermissionSet::new()
                .with_filesystem(FileSystemPermission::new(FsAction::Read, "${workspace}/*")),
            Arc::new(AuditLogger::new(100)),
        )
        .unwrap();
        let c = ctx();

        m.check_file_access(&c, FsAction::Read, "/srv/[ab]/f").await.unwrap();
        m.check_file_access(&c, FsAction::Read, "f").await.unwrap();

        let err = m
            .check_file_access(&c, FsAction::Read, "/srv/a/secret")
            .await
            .unwrap_err();
        assert_eq!(reason(&err), DenialReason::NotDeclared);

        let tool = PermissionSet::new()
            .with_filesystem(FileSystemPermission::new(FsAction::Read, "${workspace}/*"));
        m.authorize_tool(&c, "reader", &tool, &Value::Null).unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_escalations_prompt_once() {
        let provider = CountingProvider::slow(GrantScope::Session, Duration::from_millis(50));
        let m = Arc::new(
            manager(
                PermissionSet::new().with_filesystem(
                    FileSystemPermission::new(FsAction::Write, "/workspace/**").with_hitl(),
                ),
            )
            .with_hitl(provider.clone()),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = m.clone();
            handles.push(tokio::spawn(async move {
                m.check_file_access(&ctx(), FsAction::Write, "/workspace/out.txt")
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(provider.calls(), 1);
        assert!(m.inflight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_while_queued_for_escalation() {
        let provider = CountingProvider::slow(GrantScope::Session, Duration::from_millis(200));
        let m = Arc::new(
            manager(
                PermissionSet::new().with_filesystem(
                    FileSystemPermission::new(FsAction::Write, "/workspace/**").with_hitl(),
                ),
            )
            .with_hitl(provider.clone()),
        );

        let first = {
            let m = m.clone();
            tokio::spawn(async move {
                m.check_file_access(&ctx(), FsAction::Write, "/workspace/out.txt")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let queued = ctx();
        let cancel = queued.cancel.clone();
        let waiter = {
            let m = m.clone();
            tokio::spawn(async move {
                m.check_file_access(&queued, FsAction::Write, "/workspace/out.txt")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(PolicyError::Cancelled)));
        first.await.unwrap().unwrap();
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_verbose_audit_records_metadata() {
        let audit = Arc::new(AuditLogger::new(10).with_level(AuditLevel::Verbose));
        let m = PermissionManager::new(
            "/workspace",
            PermissionSet::new().with_executable(ExecutablePermission::new("ls")),
            audit.clone(),
        )
        .unwrap();

        m.check_executable(&ctx(), "ls", &strings(&["-la"]), &HashMap::new())
            .await
            .unwrap();

        let records = audit.query(&AuditFilter::new());
        assert_eq!(records[0].metadata.get("args"), Some(&json!(["-la"])));
    }

    #[tokio::test]
    async fn test_concurrent_checks() {
        let provider = CountingProvider::new(GrantScope::Session);
        let m = Arc::new(
            manager(
                workspace_read()
                    .with_network(NetworkPermission::egress("tcp", "*", 0).with_hitl()),
            )
            .with_hitl(provider),
        );

        let mut handles = Vec::new();
        for i in 0..16 {
            let m = m.clone();
            handles.push(tokio::spawn(async move {
                let c = AuthContext::new(format!("agent-{}", i));
                m.check_file_access(&c, FsAction::Read, &format!("/workspace/{}.txt", i))
                    .await?;
                m.check_network(&c, NetworkDirection::Egress, "tcp", &format!("h{}.io", i % 4), 443)
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(m.network_rules().len(), 4);
    }
}
