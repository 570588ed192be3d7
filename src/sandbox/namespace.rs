//! Namespace isolation with bubblewrap
//!
//! Every execution gets fresh user, pid, net, ipc and uts namespaces. The
//! workspace root is the only writable bind; system directories are bound
//! read-only and `/tmp` is private to the run.
//!
//! The payload is started through a small launcher that prints a per-run
//! token before `exec`. Output without that token as its first line means
//! bwrap never reached the payload, which is the only case treated as the
//! backend being unavailable.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{BackendKind, NamespaceConfig, SandboxConfig};
use crate::error::{Error, Result};
use crate::sandbox::executor::{
    host_path_var, sandbox_env, NetworkPolicy, RunLimits, RunOutput, SandboxBackend, ScratchScript,
};
use crate::sandbox::process::run_captured;
use crate::workspace::WorkspaceView;

const MOUNT_POINT: &str = "/workspace";

/// `sh -c` body run inside the sandbox: announce `$0`, then become the payload
const LAUNCHER: &str = r#"printf '%s\n' "$0"; exec "$@""#;

/// Host directories made visible (read-only) inside the sandbox
const SYSTEM_DIRS: &[&str] = &["/usr", "/bin", "/sbin", "/lib", "/lib32", "/lib64", "/etc"];

/// Bubblewrap-based backend
pub struct NamespaceBackend {
    bwrap: Option<PathBuf>,
    config: NamespaceConfig,
    python: String,
    shell: String,
    probe_timeout: std::time::Duration,
}

impl NamespaceBackend {
    pub fn new(config: &SandboxConfig) -> Self {
        let bwrap = config
            .namespace
            .bwrap_path
            .clone()
            .or_else(|| which::which("bwrap").ok());

        NamespaceBackend {
            bwrap,
            config: config.namespace.clone(),
            python: config.python_interpreter.clone(),
            shell: config.shell.clone(),
            probe_timeout: config.probe_timeout,
        }
    }

    fn bwrap(&self) -> Result<&Path> {
        self.bwrap
            .as_deref()
            .ok_or_else(|| Error::unavailable(BackendKind::Namespace.as_str(), "bwrap not found in PATH"))
    }

    /// Arguments shared by every invocation, up to (not including) the workspace bind
    fn base_args(&self, network: NetworkPolicy) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["--unshare-all", "--die-with-parent", "--new-session"]
            .into_iter()
            .map(OsString::from)
            .collect();
        if network == NetworkPolicy::Allow {
            args.push("--share-net".into());
        }

        args.extend(["--proc", "/proc", "--dev", "/dev", "--tmpfs", "/tmp"].map(OsString::from));

        for dir in SYSTEM_DIRS {
            let path = Path::new(dir);
            // Merged-/usr layouts make /bin and friends symlinks.
            if let Ok(target) = std::fs::read_link(path) {
                args.extend([OsString::from("--symlink"), target.into_os_string(), path.into()]);
            } else if path.exists() {
                args.extend([OsString::from("--ro-bind"), path.into(), path.into()]);
            }
        }

        for extra in &self.config.extra_read_only_paths {
            args.extend([OsString::from("--ro-bind-try"), extra.into(), extra.into()]);
        }

        args
    }

    /// Full argument list for running inside `workspace`
    fn sandbox_args(&self, workspace: &WorkspaceView<'_>, limits: &RunLimits) -> Vec<OsString> {
        let mount = Path::new(MOUNT_POINT);
        let mut args = self.base_args(limits.network);
        args.extend([OsString::from("--bind"), workspace.root.into(), mount.into()]);
        args.extend([
            OsString::from("--chdir"),
            mount.join(workspace.effective_cwd()).into_os_string(),
        ]);
        args
    }

    /// bwrap invocation ending in the launcher; the payload argv goes after it
    fn command(
        &self,
        workspace: &WorkspaceView<'_>,
        limits: &RunLimits,
        launch: &LaunchToken,
    ) -> Result<Command> {
        let mut cmd = Command::new(self.bwrap()?);
        cmd.args(self.sandbox_args(workspace, limits))
            .env_clear()
            .envs(sandbox_env(Path::new(MOUNT_POINT), &host_path_var(), workspace))
            .arg("--")
            .args(launch.launcher_args(&self.shell));
        Ok(cmd)
    }

    async fn run(&self, cmd: Command, limits: &RunLimits, launch: &LaunchToken) -> Result<RunOutput> {
        let limits = launch.widen(limits);
        let output = run_captured(BackendKind::Namespace, cmd, &limits).await?;
        launch.check(output)
    }
}

/// Per-run token echoed by the launcher once bwrap has set up the sandbox
#[derive(Debug, Clone)]
struct LaunchToken {
    line: String,
}

impl LaunchToken {
    fn new() -> Self {
        LaunchToken {
            line: format!("__SAFEEXEC_STARTED_{}__\n", uuid::Uuid::new_v4().simple()),
        }
    }

    fn token(&self) -> &str {
        self.line.trim_end()
    }

    fn launcher_args(&self, shell: &str) -> Vec<OsString> {
        vec![shell.into(), "-c".into(), LAUNCHER.into(), self.token().into()]
    }

    /// Room for the launch line on top of the caller's output cap
    fn widen(&self, limits: &RunLimits) -> RunLimits {
        RunLimits {
            max_output_bytes: limits.max_output_bytes.saturating_add(self.line.len()),
            ..*limits
        }
    }

    /// Strip the launch line, or report a setup failure when it is missing.
    /// Nothing the payload writes can remove a line printed before it ran.
    fn check(&self, mut output: RunOutput) -> Result<RunOutput> {
        match output.stdout.strip_prefix(self.line.as_str()) {
            Some(rest) => {
                output.stdout = rest.to_string();
                Ok(output)
            }
            None => {
                let reason = if output.timed_out {
                    "sandbox did not start before the timeout".to_string()
                } else {
                    let stderr = output.stderr.trim();
                    if stderr.is_empty() {
                        format!("bwrap exited with {:?} before starting the payload", output.exit_code)
                    } else {
                        stderr.to_string()
                    }
                };
                Err(Error::unavailable(BackendKind::Namespace.as_str(), reason))
            }
        }
    }
}

#[async_trait]
impl SandboxBackend for NamespaceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Namespace
    }

    fn mount_point(&self, _workspace: &WorkspaceView<'_>) -> PathBuf {
        PathBuf::from(MOUNT_POINT)
    }

    async fn probe(&self) -> Result<()> {
        let bwrap = self.bwrap()?;

        let mut cmd = Command::new(bwrap);
        cmd.args(self.base_args(NetworkPolicy::Deny))
            .args(["--tmpfs", MOUNT_POINT, "--chdir", MOUNT_POINT, "--"])
            .arg(&self.shell)
            .args(["-c", "true"]);

        let limits = RunLimits {
            timeout: self.probe_timeout,
            memory_limit_mb: None,
            max_output_bytes: 4096,
            network: NetworkPolicy::Deny,
        };
        let output = run_captured(BackendKind::Namespace, cmd, &limits).await?;
        if !output.success() {
            let reason = if output.timed_out {
                "probe timed out".to_string()
            } else {
                format!("probe exited with {:?}: {}", output.exit_code, output.stderr.trim())
            };
            return Err(Error::unavailable(BackendKind::Namespace.as_str(), reason));
        }

        info!("Namespace sandbox available via {}", bwrap.display());
        Ok(())
    }

    async fn run_script(
        &self,
        workspace: &WorkspaceView<'_>,
        script: &str,
        limits: &RunLimits,
    ) -> Result<RunOutput> {
        let scratch = ScratchScript::write(workspace.root, script).await?;
        let launch = LaunchToken::new();
        let result = match self.command(workspace, limits, &launch) {
            Ok(mut cmd) => {
                cmd.arg(&self.python).arg(scratch.at(Path::new(MOUNT_POINT)));
                debug!(cwd = %workspace.effective_cwd().display(), "Running script under bwrap");
                self.run(cmd, limits, &launch).await
            }
            Err(e) => Err(e),
        };
        scratch.remove().await;
        result
    }

    async fn run_shell(
        &self,
        workspace: &WorkspaceView<'_>,
        command: &str,
        limits: &RunLimits,
    ) -> Result<RunOutput> {
        let launch = LaunchToken::new();
        let mut cmd = self.command(workspace, limits, &launch)?;
        cmd.arg(&self.shell).arg("-c").arg(command);
        debug!(cwd = %workspace.effective_cwd().display(), "Running shell under bwrap");
        self.run(cmd, limits, &launch).await
    }
}
