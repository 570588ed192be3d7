//! Sandbox configuration types
//!
//! Configuration for backend selection, workspaces and the individual
//! isolation backends (namespace, container, direct).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Backends to try, highest priority first
    #[serde(default = "default_backend_order")]
    pub preferred_backend_order: Vec<BackendKind>,
    /// Permit the minimally-isolated direct backend as a last resort
    #[serde(default)]
    pub allow_direct_fallback: bool,
    /// Directory under which every conversation gets its workspace
    #[serde(default = "default_workspace_base")]
    pub workspace_root_base_dir: PathBuf,
    /// Default wall-clock timeout for execution
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,
    /// Default address-space cap for a single execution
    #[serde(default = "default_memory_limit")]
    pub default_memory_limit_mb: u64,
    /// Maximum captured bytes per stream
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
    /// Allow network egress for package-install fragments
    #[serde(default)]
    pub allow_install_network_egress: bool,
    /// Command prefixes recognized as package-install directives
    #[serde(default = "default_install_directives")]
    pub install_directives: Vec<String>,
    /// Python interpreter used for scripts
    #[serde(default = "default_python")]
    pub python_interpreter: String,
    /// Shell used for command lines
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Upper bound for a single availability probe
    #[serde(with = "humantime_serde", default = "default_probe_timeout")]
    pub probe_timeout: Duration,
    /// Namespace (bubblewrap) backend configuration
    #[serde(default)]
    pub namespace: NamespaceConfig,
    /// Container (Docker) backend configuration
    #[serde(default)]
    pub container: ContainerConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            preferred_backend_order: default_backend_order(),
            allow_direct_fallback: false,
            workspace_root_base_dir: default_workspace_base(),
            default_timeout_secs: default_timeout(),
            default_memory_limit_mb: default_memory_limit(),
            max_output_bytes: default_max_output(),
            allow_install_network_egress: false,
            install_directives: default_install_directives(),
            python_interpreter: default_python(),
            shell: default_shell(),
            probe_timeout: default_probe_timeout(),
            namespace: NamespaceConfig::default(),
            container: ContainerConfig::default(),
        }
    }
}

fn default_backend_order() -> Vec<BackendKind> {
    vec![BackendKind::Namespace, BackendKind::Container]
}

fn default_workspace_base() -> PathBuf {
    crate::config::paths::workspace_dir()
}

fn default_timeout() -> u64 {
    30
}

fn default_memory_limit() -> u64 {
    512
}

fn default_max_output() -> usize {
    1024 * 1024 // 1MB
}

fn default_install_directives() -> Vec<String> {
    vec![
        "pip install".to_string(),
        "pip3 install".to_string(),
        "python -m pip install".to_string(),
        "python3 -m pip install".to_string(),
    ]
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Isolation technology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Lightweight namespace sandbox (bubblewrap)
    Namespace,
    /// Ephemeral Docker containers
    Container,
    /// Plain subprocess confined to the workspace directory only
    Direct,
}

impl BackendKind {
    /// Stable identifier used in results and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Namespace => "namespace",
            BackendKind::Container => "container",
            BackendKind::Direct => "direct",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "namespace" | "bwrap" | "bubblewrap" => Ok(BackendKind::Namespace),
            "container" | "docker" => Ok(BackendKind::Container),
            "direct" | "os" | "none" => Ok(BackendKind::Direct),
            _ => Err(crate::error::Error::Config(format!(
                "Invalid backend: {}. Valid: namespace, container, direct",
                s
            ))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace (bubblewrap) backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Explicit path to `bwrap`; looked up in PATH when unset
    pub bwrap_path: Option<PathBuf>,
    /// Extra host paths bound read-only (e.g. an interpreter under /opt)
    #[serde(default)]
    pub extra_read_only_paths: Vec<PathBuf>,
}

/// Container (Docker) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Docker image to use
    #[serde(default = "default_image")]
    pub image: String,
    /// CPU limit (number of CPUs)
    #[serde(default = "default_cpu")]
    pub cpu_limit: f64,
    /// Maximum number of processes inside the container
    #[serde(default = "default_pids")]
    pub pids_limit: i64,
    /// Pull the image on probe when it is missing locally
    #[serde(default = "default_true")]
    pub pull_image: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            image: default_image(),
            cpu_limit: default_cpu(),
            pids_limit: default_pids(),
            pull_image: true,
        }
    }
}

fn default_image() -> String {
    "joshxt/safeexecute:latest".to_string()
}

fn default_cpu() -> f64 {
    1.0
}

fn default_pids() -> i64 {
    256
}

fn default_true() -> bool {
    true
}
