//! Backend contract and the request/result types shared across the crate

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::BackendKind;
use crate::error::{Error, Result};
use crate::workspace::WorkspaceView;

/// Kind of payload submitted by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// Python code (possibly free text with fenced blocks)
    Python,
    /// A shell command line
    Shell,
}

impl std::str::FromStr for PayloadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "python" | "py" | "code" => Ok(PayloadKind::Python),
            "shell" | "sh" | "bash" => Ok(PayloadKind::Shell),
            _ => Err(Error::InvalidInput(format!(
                "Unknown payload kind: {}. Supported: python, shell",
                s
            ))),
        }
    }
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadKind::Python => write!(f, "python"),
            PayloadKind::Shell => write!(f, "shell"),
        }
    }
}

/// Optional per-request limits; unset fields fall back to configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLimits {
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default, rename = "memoryLimitMB")]
    pub memory_limit_mb: Option<u64>,
}

impl ExecutionLimits {
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_memory_limit(mut self, mb: u64) -> Self {
        self.memory_limit_mb = Some(mb);
        self
    }
}

/// Request to execute something on behalf of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub conversation_id: String,
    pub kind: PayloadKind,
    pub text: String,
    #[serde(default)]
    pub limits: ExecutionLimits,
}

impl ExecutionRequest {
    pub fn new(conversation_id: impl Into<String>, kind: PayloadKind, text: impl Into<String>) -> Self {
        ExecutionRequest {
            conversation_id: conversation_id.into(),
            kind,
            text: text.into(),
            limits: ExecutionLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Whether the child may reach the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPolicy {
    Deny,
    Allow,
}

/// Fully resolved limits handed to a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub timeout: Duration,
    pub memory_limit_mb: Option<u64>,
    pub max_output_bytes: usize,
    pub network: NetworkPolicy,
}

impl RunLimits {
    pub fn allows_network(&self) -> bool {
        self.network == NetworkPolicy::Allow
    }
}

/// Raw outcome of one backend execution
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `None` when the process was killed on timeout
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Either stream hit the capture limit
    pub truncated: bool,
    pub duration: Duration,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Contract implemented by every isolation backend
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Which isolation technology this is
    fn kind(&self) -> BackendKind;

    /// Identifier reported in results
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Where the workspace root appears to the child process
    fn mount_point(&self, workspace: &WorkspaceView<'_>) -> PathBuf;

    /// One-time capability check; an error means "do not use this backend"
    async fn probe(&self) -> Result<()>;

    /// Run a Python script with the workspace cwd as working directory
    async fn run_script(
        &self,
        workspace: &WorkspaceView<'_>,
        script: &str,
        limits: &RunLimits,
    ) -> Result<RunOutput>;

    /// Run a command line with the configured shell
    async fn run_shell(
        &self,
        workspace: &WorkspaceView<'_>,
        command: &str,
        limits: &RunLimits,
    ) -> Result<RunOutput>;
}

/// Environment every child starts with: HOME and the pip user site point
/// into the workspace so installs persist per conversation.
pub(crate) fn sandbox_env(
    mount: &Path,
    path_var: &str,
    workspace: &WorkspaceView<'_>,
) -> Vec<(String, String)> {
    let home = mount.to_string_lossy().to_string();
    let mut env = vec![
        ("PATH".to_string(), path_var.to_string()),
        ("HOME".to_string(), home.clone()),
        ("PYTHONUSERBASE".to_string(), format!("{}/.local", home)),
        ("PIP_USER".to_string(), "1".to_string()),
        ("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string()),
        ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
        ("LANG".to_string(), "C.UTF-8".to_string()),
        ("TMPDIR".to_string(), "/tmp".to_string()),
    ];
    env.extend(workspace.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// PATH used inside sandboxes that share the host's interpreters
pub(crate) fn host_path_var() -> String {
    std::env::var("PATH")
        .unwrap_or_else(|_| "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string())
}

/// Scratch script written into the workspace for the duration of one run
pub(crate) struct ScratchScript {
    host_path: PathBuf,
    relative: PathBuf,
}

impl ScratchScript {
    const DIR: &'static str = ".safeexec";

    pub async fn write(root: &Path, script: &str) -> Result<Self> {
        let dir = root.join(Self::DIR);
        tokio::fs::create_dir_all(&dir).await?;

        let name = format!("run-{}.py", uuid::Uuid::new_v4().simple());
        let host_path = dir.join(&name);
        tokio::fs::write(&host_path, script).await?;

        Ok(ScratchScript {
            host_path,
            relative: Path::new(Self::DIR).join(name),
        })
    }

    /// Path of the script as seen from `mount`
    pub fn at(&self, mount: &Path) -> PathBuf {
        mount.join(&self.relative)
    }

    pub async fn remove(self) {
        if let Err(e) = tokio::fs::remove_file(&self.host_path).await {
            tracing::debug!("Failed to remove scratch script {}: {}", self.host_path.display(), e);
        }
    }
}
