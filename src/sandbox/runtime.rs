//! Low-level runtime control: backend probing and CLI invocation.
//!
//! Each backend is an external OCI-compliant control binary driven via
//! subcommands (`create`, `start`, `exec`, `kill`, `delete`). Probing
//! walks a fixed strongest-isolation-first order and picks the first
//! usable binary. A plain process-namespace container runtime is not a
//! candidate: without kernel-level isolation it does not meet the
//! security bar for untrusted skill code.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{redact, CoreError};

/// How long a `--version` probe may take before the binary is treated
/// as unusable.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Supported kernel-isolation backends, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// gVisor: user-space kernel, syscall interception.
    Gvisor,
    /// Kata Containers: lightweight VM per sandbox.
    Kata,
}

impl RuntimeKind {
    /// Probe order. Index zero is preferred.
    pub const PROBE_ORDER: [RuntimeKind; 2] = [RuntimeKind::Gvisor, RuntimeKind::Kata];

    /// Name of the control binary on PATH.
    pub fn binary(self) -> &'static str {
        match self {
            RuntimeKind::Gvisor => "runsc",
            RuntimeKind::Kata => "kata-runtime",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeKind::Gvisor => "gvisor",
            RuntimeKind::Kata => "kata",
        };
        write!(f, "{s}")
    }
}

/// Finds the first usable backend, or None when the host has no
/// acceptable isolation runtime installed.
pub async fn probe() -> Option<RuntimeKind> {
    for kind in RuntimeKind::PROBE_ORDER {
        if is_usable(kind.binary()).await {
            info!("sandbox runtime detected: {kind} ({})", kind.binary());
            return Some(kind);
        }
    }
    None
}

/// Runs `<binary> --version` with a short deadline and reports whether
/// the control binary responds.
async fn is_usable(binary: &str) -> bool {
    let probe = Command::new(binary)
        .arg("--version")
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
        Ok(Ok(output)) => output.status.success(),
        _ => false,
    }
}

/// Wrapper around one backend's control binary.
///
/// All invocations pass the runtime state root (`--root`) so concurrent
/// engines on one host cannot stomp on each other's container state.
pub struct RuntimeCli {
    kind: RuntimeKind,
    binary: PathBuf,
    state_root: PathBuf,
}

impl RuntimeCli {
    pub fn new(kind: RuntimeKind, state_root: PathBuf) -> Self {
        Self::with_binary(kind, state_root, PathBuf::from(kind.binary()))
    }

    /// Drives an explicit control binary instead of resolving
    /// `kind.binary()` on PATH. Tests use this to stand in a stub.
    pub(crate) fn with_binary(kind: RuntimeKind, state_root: PathBuf, binary: PathBuf) -> Self {
        Self {
            kind,
            binary,
            state_root,
        }
    }

    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }

    /// `create --bundle <dir> <container>`
    pub async fn create(&self, container: &str, bundle: &Path) -> Result<(), CoreError> {
        let bundle = bundle.display().to_string();
        self.run_checked(&["create", "--bundle", &bundle, container])
            .await
    }

    /// `start <container>`
    pub async fn start(&self, container: &str) -> Result<(), CoreError> {
        self.run_checked(&["start", container]).await
    }

    /// `exec <container> sh -c <command>`
    ///
    /// Returns the raw output: a non-zero exit of the sandboxed command
    /// is a result, not a backend error.
    pub async fn exec(&self, container: &str, command: &str) -> Result<Output, CoreError> {
        self.run(&["exec", container, "sh", "-c", command]).await
    }

    /// `kill <container> <signal>`
    pub async fn kill(&self, container: &str, signal: &str) -> Result<(), CoreError> {
        self.run_checked(&["kill", container, signal]).await
    }

    /// `delete --force <container>`
    pub async fn delete(&self, container: &str) -> Result<(), CoreError> {
        self.run_checked(&["delete", "--force", container]).await
    }

    async fn run(&self, args: &[&str]) -> Result<Output, CoreError> {
        debug!("runtime: {} {}", self.binary.display(), args.join(" "));
        Command::new(&self.binary)
            .arg(format!("--root={}", self.state_root.display()))
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(CoreError::backend)
    }

    /// Like [`run`], but treats a non-zero exit of the control binary
    /// itself as a backend error carrying redacted stderr.
    async fn run_checked(&self, args: &[&str]) -> Result<(), CoreError> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(CoreError::Backend(redact(&format!(
                "{} {} failed: {}",
                self.kind.binary(),
                args.first().unwrap_or(&"?"),
                stderr.trim()
            ))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_order_is_strongest_first() {
        assert_eq!(RuntimeKind::PROBE_ORDER[0], RuntimeKind::Gvisor);
        assert_eq!(RuntimeKind::PROBE_ORDER[1], RuntimeKind::Kata);
    }

    #[test]
    fn test_control_binary_names() {
        assert_eq!(RuntimeKind::Gvisor.binary(), "runsc");
        assert_eq!(RuntimeKind::Kata.binary(), "kata-runtime");
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_usable() {
        assert!(!is_usable("warden-no-such-runtime-binary").await);
    }

    #[tokio::test]
    async fn test_cli_surfaces_backend_error_for_missing_binary() {
        let cli = RuntimeCli::new(RuntimeKind::Gvisor, PathBuf::from("/tmp/warden-test-root"));
        // runsc is absent in the test environment, or if present the
        // container does not exist: either way this must be a typed
        // backend error, not a panic.
        let result = cli.start("warden-test-missing-container").await;
        assert!(matches!(result, Err(CoreError::Backend(_))));
    }
}
