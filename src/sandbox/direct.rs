//! Direct execution in the workspace directory
//!
//! The least isolated option: a plain subprocess whose working directory is
//! inside the workspace root. It has no filesystem, network or process
//! isolation and is only ever registered when configuration explicitly
//! allows it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{BackendKind, SandboxConfig};
use crate::error::{Error, Result};
use crate::sandbox::executor::{
    host_path_var, sandbox_env, RunLimits, RunOutput, SandboxBackend, ScratchScript,
};
use crate::sandbox::process::run_captured;
use crate::workspace::WorkspaceView;

/// Unconfined subprocess backend
pub struct DirectBackend {
    python: String,
    shell: String,
}

impl DirectBackend {
    pub fn new(config: &SandboxConfig) -> Self {
        DirectBackend {
            python: config.python_interpreter.clone(),
            shell: config.shell.clone(),
        }
    }

    fn command(&self, program: &str, workspace: &WorkspaceView<'_>) -> Command {
        let mut cmd = Command::new(program);
        cmd.current_dir(workspace.root.join(workspace.effective_cwd()))
            .env_clear()
            .envs(sandbox_env(workspace.root, &host_path_var(), workspace));
        cmd
    }
}

#[async_trait]
impl SandboxBackend for DirectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    /// The child sees the host path of the root
    fn mount_point(&self, workspace: &WorkspaceView<'_>) -> PathBuf {
        workspace.root.to_path_buf()
    }

    async fn probe(&self) -> Result<()> {
        which::which(&self.shell).map_err(|e| {
            Error::unavailable(
                BackendKind::Direct.as_str(),
                format!("shell {} not found: {}", self.shell, e),
            )
        })?;
        warn!("Direct execution enabled: commands run without isolation");
        Ok(())
    }

    async fn run_script(
        &self,
        workspace: &WorkspaceView<'_>,
        script: &str,
        limits: &RunLimits,
    ) -> Result<RunOutput> {
        let scratch = ScratchScript::write(workspace.root, script).await?;
        let mut cmd = self.command(&self.python, workspace);
        cmd.arg(scratch.at(workspace.root));

        debug!(cwd = %workspace.effective_cwd().display(), "Running script directly");
        let result = run_captured(BackendKind::Direct, cmd, limits).await;
        scratch.remove().await;
        result
    }

    async fn run_shell(
        &self,
        workspace: &WorkspaceView<'_>,
        command: &str,
        limits: &RunLimits,
    ) -> Result<RunOutput> {
        let mut cmd = self.command(&self.shell, workspace);
        cmd.arg("-c").arg(command);

        debug!(cwd = %workspace.effective_cwd().display(), "Running shell directly");
        run_captured(BackendKind::Direct, cmd, limits).await
    }
}

/// Python interpreter lookup used by tests that need a real interpreter
#[cfg(test)]
pub(crate) fn python_available() -> bool {
    which::which("python3").is_ok()
}
