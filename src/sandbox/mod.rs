//! Sandboxed execution engine.
//!
//! Creates, execs into, and tears down isolated execution environments
//! for skill code. Actual kernel-level containment is delegated to an
//! external OCI runtime ([`runtime`]); this module owns instance
//! lifecycle, bundle preparation, the isolation descriptor ([`oci`]),
//! and every failure path around the runtime subprocesses.
//!
//! Per-instance operations are serialized through an operation lock per
//! id; distinct instances proceed independently.

pub mod oci;
pub mod runtime;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::error::{redact, CoreError};

pub use runtime::RuntimeKind;

use runtime::RuntimeCli;

/// Resource quotas applied to one sandbox instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_cpu_cores")]
    pub cpu_cores: f64,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    #[serde(default = "default_disk_mb")]
    pub disk_mb: u64,
    /// Network is off unless explicitly requested; see [`oci`] for the
    /// two controls this flag drives.
    #[serde(default)]
    pub network_enabled: bool,
    #[serde(default = "default_max_processes")]
    pub max_processes: u32,
}

fn default_cpu_cores() -> f64 {
    1.0
}

fn default_memory_mb() -> u64 {
    512
}

fn default_disk_mb() -> u64 {
    1024
}

fn default_max_processes() -> u32 {
    50
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_cores: default_cpu_cores(),
            memory_mb: default_memory_mb(),
            disk_mb: default_disk_mb(),
            network_enabled: false,
            max_processes: default_max_processes(),
        }
    }
}

/// Lifecycle status of a sandbox instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Pending,
    Creating,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SandboxStatus::Pending => "pending",
            SandboxStatus::Creating => "creating",
            SandboxStatus::Running => "running",
            SandboxStatus::Stopping => "stopping",
            SandboxStatus::Stopped => "stopped",
            SandboxStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// One tracked sandbox instance. Exactly one backend container handle
/// per instance; removed from the live set only by stop/cleanup.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxInstance {
    pub id: Uuid,
    pub skill_id: String,
    pub runtime: RuntimeKind,
    pub status: SandboxStatus,
    pub container_id: Option<String>,
    pub limits: ResourceLimits,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
}

impl SandboxInstance {
    fn new(skill_id: &str, runtime: RuntimeKind, limits: ResourceLimits) -> Self {
        Self {
            id: Uuid::new_v4(),
            skill_id: skill_id.to_string(),
            runtime,
            status: SandboxStatus::Pending,
            container_id: None,
            limits,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            exit_code: None,
            error_message: None,
        }
    }
}

/// Captured output of one exec.
#[derive(Debug, Clone, Serialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Owns all sandbox instances and all runtime subprocess interaction.
pub struct SandboxEngine {
    config: SandboxConfig,
    /// None when no acceptable runtime was found; `create` then fails
    /// fast instead of degrading to a weaker isolation mechanism.
    cli: Option<RuntimeCli>,
    instances: Mutex<HashMap<Uuid, SandboxInstance>>,
    op_locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl SandboxEngine {
    /// Probes for a usable backend and builds the engine. An engine
    /// without a backend still answers status queries; only `create`
    /// is refused.
    pub async fn detect(config: SandboxConfig) -> Self {
        let cli = match runtime::probe().await {
            Some(kind) => Some(RuntimeCli::new(kind, config.runtime_root.clone())),
            None => {
                warn!(
                    "no kernel-isolation sandbox runtime found ({}); skill execution disabled",
                    RuntimeKind::PROBE_ORDER
                        .iter()
                        .map(|k| k.binary())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                None
            }
        };
        Self::with_cli(config, cli)
    }

    pub(crate) fn with_cli(config: SandboxConfig, cli: Option<RuntimeCli>) -> Self {
        Self {
            config,
            cli,
            instances: Mutex::new(HashMap::new()),
            op_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn available(&self) -> bool {
        self.cli.is_some()
    }

    pub fn runtime_kind(&self) -> Option<RuntimeKind> {
        self.cli.as_ref().map(|c| c.kind())
    }

    pub fn get(&self, id: Uuid) -> Option<SandboxInstance> {
        self.instances.lock().expect("instance table").get(&id).cloned()
    }

    pub fn list(&self) -> Vec<SandboxInstance> {
        self.instances
            .lock()
            .expect("instance table")
            .values()
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.instances.lock().expect("instance table").len()
    }

    /// Creates and starts a sandbox for `skill_id`.
    ///
    /// Fails fast with Unavailable when no backend exists and with
    /// Capacity when the live-instance cap is reached (the live set is
    /// unchanged on both paths). On a mid-creation failure the instance
    /// transitions to ERROR, partially created backend resources are
    /// rolled back best-effort, and the instance leaves the live set so
    /// its capacity slot is reclaimed.
    pub async fn create(
        &self,
        skill_id: &str,
        limits: Option<ResourceLimits>,
    ) -> Result<SandboxInstance, CoreError> {
        let cli = self.cli.as_ref().ok_or_else(|| {
            CoreError::Unavailable(
                "no kernel-isolation runtime (gVisor or Kata) on this host".to_string(),
            )
        })?;

        let limits = limits.unwrap_or_else(|| self.config.limits.clone());
        let instance = SandboxInstance::new(skill_id, cli.kind(), limits.clone());
        let id = instance.id;

        {
            let mut instances = self.instances.lock().expect("instance table");
            if instances.len() >= self.config.max_instances {
                return Err(CoreError::Capacity(format!(
                    "sandbox instance cap ({}) reached",
                    self.config.max_instances
                )));
            }
            instances.insert(id, instance);
        }

        let op_lock = self.op_lock(id);
        let _guard = op_lock.lock().await;

        info!("creating sandbox {id} for skill {skill_id}");
        self.update(id, |i| i.status = SandboxStatus::Creating);

        match self.provision(cli, id, skill_id, &limits).await {
            Ok(container) => {
                let snapshot = self.update(id, |i| {
                    i.status = SandboxStatus::Running;
                    i.started_at = Some(Utc::now());
                    i.container_id = Some(container.clone());
                });
                info!("sandbox {id} running (container {container})");
                snapshot.ok_or_else(|| CoreError::NotFound(format!("sandbox {id}")))
            }
            Err(e) => {
                let message = redact(&e.to_string());
                self.update(id, |i| {
                    i.status = SandboxStatus::Error;
                    i.error_message = Some(message.clone());
                });
                error!("sandbox {id} creation failed: {message}");
                // Nothing is running and provision already rolled the
                // backend resources back; holding the slot would let
                // transient failures eat the capacity cap.
                self.instances.lock().expect("instance table").remove(&id);
                self.op_locks.lock().expect("op locks").remove(&id);
                Err(e)
            }
        }
    }

    /// Prepares the bundle, then drives the backend through
    /// create/start. Returns the container name.
    async fn provision(
        &self,
        cli: &RuntimeCli,
        id: Uuid,
        skill_id: &str,
        limits: &ResourceLimits,
    ) -> Result<String, CoreError> {
        let container = format!("warden-{id}");
        let bundle = self.config.root_dir.join(id.to_string()).join("bundle");

        let spec = oci::build_spec(&id.to_string(), skill_id, limits);
        let spec_json = serde_json::to_vec_pretty(&spec).map_err(CoreError::backend)?;

        let bundle_dir = bundle.clone();
        let skill_src = self.config.skills_dir.join(skill_id);
        let prepared = tokio::task::spawn_blocking(move || {
            prepare_bundle(&bundle_dir, &skill_src, &spec_json)
        })
        .await
        .map_err(CoreError::backend)?;
        if let Err(e) = prepared {
            self.discard_bundle(id).await;
            return Err(CoreError::backend(format!("bundle preparation: {e}")));
        }

        if let Err(e) = cli.create(&container, &bundle).await {
            self.rollback(cli, &container, id).await;
            return Err(e);
        }
        if let Err(e) = cli.start(&container).await {
            self.rollback(cli, &container, id).await;
            return Err(e);
        }

        Ok(container)
    }

    /// Executes a command inside a running instance under a hard
    /// wall-clock deadline.
    ///
    /// A deadline excess returns the distinct Timeout error; the
    /// dropped exec future kills the local control process
    /// (best-effort — the in-sandbox process may survive, which is why
    /// the instance stays RUNNING until separately stopped).
    pub async fn exec(
        &self,
        id: Uuid,
        command: &str,
        timeout_secs: u64,
    ) -> Result<ExecOutput, CoreError> {
        let container = {
            let instances = self.instances.lock().expect("instance table");
            let instance = instances
                .get(&id)
                .ok_or_else(|| CoreError::NotFound(format!("sandbox {id}")))?;
            if instance.status != SandboxStatus::Running {
                return Err(CoreError::InvalidState(format!(
                    "sandbox {id} is {} (exec requires running)",
                    instance.status
                )));
            }
            instance
                .container_id
                .clone()
                .ok_or_else(|| CoreError::InvalidState(format!("sandbox {id} has no container")))?
        };
        let cli = self.cli.as_ref().ok_or_else(|| {
            CoreError::Unavailable("sandbox runtime gone while instance running".to_string())
        })?;

        let op_lock = self.op_lock(id);
        let _guard = op_lock.lock().await;

        debug!("exec in sandbox {id}: {command}");
        let deadline = Duration::from_secs(timeout_secs);
        match tokio::time::timeout(deadline, cli.exec(&container, command)).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                self.update(id, |i| i.exit_code = Some(exit_code));
                Ok(ExecOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("exec in sandbox {id} exceeded {timeout_secs}s deadline");
                Err(CoreError::Timeout {
                    seconds: timeout_secs,
                })
            }
        }
    }

    /// Stops an instance and tears down its backend resources.
    ///
    /// Non-forced stops send TERM, wait the grace window, then escalate
    /// to KILL; forced stops go straight to KILL. The backend delete
    /// always runs, and the instance leaves the live set either way —
    /// a failed teardown is reported via the ERROR status, not leaked.
    pub async fn stop(&self, id: Uuid, force: bool) -> Result<SandboxInstance, CoreError> {
        if !self.instances.lock().expect("instance table").contains_key(&id) {
            return Err(CoreError::NotFound(format!("sandbox {id}")));
        }

        let op_lock = self.op_lock(id);
        let _guard = op_lock.lock().await;

        info!("stopping sandbox {id} (force={force})");
        let container = self
            .update(id, |i| i.status = SandboxStatus::Stopping)
            .and_then(|i| i.container_id);

        let mut teardown_error: Option<String> = None;
        if let (Some(cli), Some(container)) = (self.cli.as_ref(), container) {
            let signal = if force { "KILL" } else { "TERM" };
            if let Err(e) = cli.kill(&container, signal).await {
                debug!("kill {signal} for {container}: {e}");
            }
            if !force {
                tokio::time::sleep(Duration::from_secs(self.config.stop_grace_secs)).await;
                if let Err(e) = cli.kill(&container, "KILL").await {
                    debug!("escalation kill for {container}: {e}");
                }
            }
            if let Err(e) = cli.delete(&container).await {
                teardown_error = Some(redact(&e.to_string()));
            }
        }

        self.discard_bundle(id).await;

        let snapshot = self.update(id, |i| {
            i.stopped_at = Some(Utc::now());
            match &teardown_error {
                Some(message) => {
                    i.status = SandboxStatus::Error;
                    i.error_message = Some(message.clone());
                    warn!("sandbox {id} teardown failed: {message}");
                }
                None => i.status = SandboxStatus::Stopped,
            }
        });

        self.instances.lock().expect("instance table").remove(&id);
        self.op_locks.lock().expect("op locks").remove(&id);

        snapshot.ok_or_else(|| CoreError::NotFound(format!("sandbox {id}")))
    }

    /// Force-stops and removes every tracked instance. Best-effort;
    /// used at shutdown.
    pub async fn cleanup(&self) {
        let ids: Vec<Uuid> = self
            .instances
            .lock()
            .expect("instance table")
            .keys()
            .copied()
            .collect();
        if ids.is_empty() {
            return;
        }
        info!("cleaning up {} sandbox instance(s)", ids.len());
        let stops = ids.into_iter().map(|id| self.stop(id, true));
        for result in futures::future::join_all(stops).await {
            if let Err(e) = result {
                warn!("sandbox cleanup: {e}");
            }
        }
    }

    async fn rollback(&self, cli: &RuntimeCli, container: &str, id: Uuid) {
        if let Err(e) = cli.delete(container).await {
            debug!("rollback delete for {container}: {e}");
        }
        self.discard_bundle(id).await;
    }

    async fn discard_bundle(&self, id: Uuid) {
        let dir = self.config.root_dir.join(id.to_string());
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != io::ErrorKind::NotFound {
                debug!("bundle cleanup for {id}: {e}");
            }
        }
    }

    fn op_lock(&self, id: Uuid) -> Arc<AsyncMutex<()>> {
        self.op_locks
            .lock()
            .expect("op locks")
            .entry(id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn update<F>(&self, id: Uuid, mutate: F) -> Option<SandboxInstance>
    where
        F: FnOnce(&mut SandboxInstance),
    {
        let mut instances = self.instances.lock().expect("instance table");
        let instance = instances.get_mut(&id)?;
        mutate(instance);
        Some(instance.clone())
    }
}

/// Lays out the bundle on disk: rootfs skeleton, skill payload, and the
/// serialized isolation descriptor. Runs on the blocking pool.
fn prepare_bundle(bundle: &Path, skill_src: &Path, spec_json: &[u8]) -> io::Result<()> {
    let rootfs = bundle.join("rootfs");
    for dir in ["bin", "lib", "usr", "tmp", "home", "etc", "app"] {
        std::fs::create_dir_all(rootfs.join(dir))?;
    }
    if skill_src.is_dir() {
        copy_tree(skill_src, &rootfs.join("app").join("skill"))?;
    }
    std::fs::write(bundle.join("config.json"), spec_json)?;
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config(root: &Path) -> SandboxConfig {
        SandboxConfig {
            root_dir: root.join("bundles"),
            runtime_root: root.join("state"),
            skills_dir: root.join("skills"),
            max_instances: 2,
            exec_timeout_secs: 1,
            stop_grace_secs: 0,
            limits: ResourceLimits::default(),
        }
    }

    /// Engine with a configured backend whose control binary does not
    /// exist in the test environment; runtime invocations fail as
    /// backend errors, which is exactly what the failure paths need.
    fn engine_with_dead_backend(root: &Path) -> SandboxEngine {
        SandboxEngine::with_cli(
            test_config(root),
            Some(RuntimeCli::new(
                RuntimeKind::Gvisor,
                PathBuf::from(root.join("state")),
            )),
        )
    }

    /// Engine whose control binary is a shell stub, so exec behavior
    /// can be scripted without a real runtime on the host.
    fn engine_with_stub_backend(root: &Path, script: &str) -> SandboxEngine {
        use std::os::unix::fs::PermissionsExt;
        let stub = root.join("runsc-stub");
        std::fs::write(&stub, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
        SandboxEngine::with_cli(
            test_config(root),
            Some(RuntimeCli::with_binary(
                RuntimeKind::Gvisor,
                root.join("state"),
                stub,
            )),
        )
    }

    fn running_instance(engine: &SandboxEngine, skill: &str) -> Uuid {
        let mut instance =
            SandboxInstance::new(skill, RuntimeKind::Gvisor, ResourceLimits::default());
        instance.status = SandboxStatus::Running;
        instance.container_id = Some(format!("warden-{}", instance.id));
        let id = instance.id;
        engine
            .instances
            .lock()
            .unwrap()
            .insert(id, instance);
        id
    }

    // ── Availability and capacity ────────────────────────

    #[tokio::test]
    async fn test_create_without_backend_fails_fast() {
        let engine = SandboxEngine::with_cli(SandboxConfig::default(), None);
        let result = engine.create("echo", None).await;
        assert!(matches!(result, Err(CoreError::Unavailable(_))));
        assert_eq!(engine.count(), 0);
        assert!(!engine.available());
    }

    #[tokio::test]
    async fn test_create_beyond_cap_returns_capacity_error() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with_dead_backend(tmp.path());
        running_instance(&engine, "a");
        running_instance(&engine, "b");
        assert_eq!(engine.count(), 2);

        let result = engine.create("c", None).await;
        assert!(matches!(result, Err(CoreError::Capacity(_))));
        // Live set unchanged on the rejection path.
        assert_eq!(engine.count(), 2);
    }

    // ── Creation failure and rollback ────────────────────

    #[tokio::test]
    async fn test_failed_creation_reclaims_slot_and_rolls_back_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with_dead_backend(tmp.path());

        let result = engine.create("echo", None).await;
        assert!(matches!(result, Err(CoreError::Backend(_))));

        // The errored instance leaves the live set with its backend
        // resources and bundle rolled back.
        assert_eq!(engine.count(), 0);
        let bundles = tmp.path().join("bundles");
        let leftovers = std::fs::read_dir(&bundles)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0, "partial bundle must be rolled back");
    }

    #[tokio::test]
    async fn test_failed_creates_do_not_exhaust_capacity() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with_dead_backend(tmp.path());

        // Cap is 2; more failed creates than that must keep failing on
        // the backend, never on capacity.
        for _ in 0..4 {
            let result = engine.create("echo", None).await;
            assert!(matches!(result, Err(CoreError::Backend(_))));
        }
        assert_eq!(engine.count(), 0);
    }

    // ── Exec preconditions ───────────────────────────────

    #[tokio::test]
    async fn test_exec_unknown_instance_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with_dead_backend(tmp.path());
        let result = engine.exec(Uuid::new_v4(), "true", 1).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_exec_requires_running_status() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with_dead_backend(tmp.path());
        let mut instance =
            SandboxInstance::new("echo", RuntimeKind::Gvisor, ResourceLimits::default());
        instance.status = SandboxStatus::Creating;
        let id = instance.id;
        engine.instances.lock().unwrap().insert(id, instance);

        let result = engine.exec(id, "true", 1).await;
        assert!(matches!(result, Err(CoreError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_exec_backend_failure_is_typed_not_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with_dead_backend(tmp.path());
        let id = running_instance(&engine, "echo");
        let result = engine.exec(id, "true", 5).await;
        assert!(matches!(result, Err(CoreError::Backend(_))));
        // A failed exec does not change the instance status.
        assert_eq!(engine.get(id).unwrap().status, SandboxStatus::Running);
    }

    #[tokio::test]
    async fn test_exec_past_deadline_is_timeout_and_leaves_instance_running() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with_stub_backend(tmp.path(), "sleep 60");
        let id = running_instance(&engine, "echo");

        let started = std::time::Instant::now();
        let result = engine.exec(id, "true", 1).await;
        assert!(matches!(result, Err(CoreError::Timeout { seconds: 1 })));
        assert!(started.elapsed() < Duration::from_secs(5), "must not hang");
        // A deadline excess is not a lifecycle event; the instance is
        // still RUNNING until separately stopped.
        assert_eq!(engine.get(id).unwrap().status, SandboxStatus::Running);
    }

    #[tokio::test]
    async fn test_exec_within_deadline_returns_output() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with_stub_backend(tmp.path(), "echo ok");
        let id = running_instance(&engine, "echo");

        let output = engine.exec(id, "true", 5).await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "ok");
        assert_eq!(engine.get(id).unwrap().exit_code, Some(0));
    }

    // ── Stop and cleanup ─────────────────────────────────

    #[tokio::test]
    async fn test_stop_unknown_instance_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with_dead_backend(tmp.path());
        let result = engine.stop(Uuid::new_v4(), true).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_forced_stop_removes_instance_even_when_kill_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with_dead_backend(tmp.path());
        let id = running_instance(&engine, "echo");

        let snapshot = engine.stop(id, true).await.unwrap();
        // Teardown failed (no runtime binary) so the final state is
        // ERROR, but the instance is gone from the live set regardless.
        assert_eq!(snapshot.status, SandboxStatus::Error);
        assert!(snapshot.error_message.is_some());
        assert!(snapshot.stopped_at.is_some());
        assert_eq!(engine.count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_empties_live_set() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with_dead_backend(tmp.path());
        running_instance(&engine, "a");
        running_instance(&engine, "b");
        engine.cleanup().await;
        assert_eq!(engine.count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_on_empty_engine_is_noop() {
        let engine = SandboxEngine::with_cli(SandboxConfig::default(), None);
        engine.cleanup().await;
        assert_eq!(engine.count(), 0);
    }

    // ── Bundle preparation ───────────────────────────────

    #[test]
    fn test_prepare_bundle_writes_skeleton_and_descriptor() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = tmp.path().join("bundle");
        let skills = tmp.path().join("skills").join("echo");
        std::fs::create_dir_all(&skills).unwrap();
        std::fs::write(skills.join("skill.py"), "print('ok')\n").unwrap();

        let spec = oci::build_spec("abc", "echo", &ResourceLimits::default());
        let json = serde_json::to_vec_pretty(&spec).unwrap();
        prepare_bundle(&bundle, &skills, &json).unwrap();

        assert!(bundle.join("config.json").is_file());
        assert!(bundle.join("rootfs").join("tmp").is_dir());
        assert!(bundle
            .join("rootfs")
            .join("app")
            .join("skill")
            .join("skill.py")
            .is_file());
    }

    #[test]
    fn test_prepare_bundle_without_payload_still_builds_skeleton() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = tmp.path().join("bundle");
        let missing = tmp.path().join("skills").join("ghost");

        prepare_bundle(&bundle, &missing, b"{}").unwrap();
        assert!(bundle.join("config.json").is_file());
        assert!(!bundle.join("rootfs").join("app").join("skill").exists());
    }

    #[test]
    fn test_resource_limits_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.cpu_cores, 1.0);
        assert_eq!(limits.memory_mb, 512);
        assert!(!limits.network_enabled);
        assert_eq!(limits.max_processes, 50);
    }
}
