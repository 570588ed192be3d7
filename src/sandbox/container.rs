//! Docker container-based execution
//!
//! Each run gets an ephemeral container with the workspace root bind-mounted
//! at `/workspace`. The container is killed on timeout and always removed
//! once its logs have been collected.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{BackendKind, ContainerConfig, SandboxConfig};
use crate::error::{Error, Result};
use crate::sandbox::executor::{
    sandbox_env, RunLimits, RunOutput, SandboxBackend, ScratchScript,
};
use crate::sandbox::process::CappedBuffer;
use crate::workspace::WorkspaceView;

const MOUNT_POINT: &str = "/workspace";
const CONTAINER_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Docker container backend
pub struct ContainerBackend {
    /// Docker client, connected on first use
    docker: OnceCell<Docker>,
    config: ContainerConfig,
    python: String,
    shell: String,
    probe_timeout: std::time::Duration,
}

impl ContainerBackend {
    pub fn new(config: &SandboxConfig) -> Self {
        ContainerBackend {
            docker: OnceCell::new(),
            config: config.container.clone(),
            python: config.python_interpreter.clone(),
            shell: config.shell.clone(),
            probe_timeout: config.probe_timeout,
        }
    }

    async fn docker(&self) -> Result<&Docker> {
        self.docker
            .get_or_try_init(|| async {
                Docker::connect_with_local_defaults().map_err(|e| {
                    Error::unavailable(
                        BackendKind::Container.as_str(),
                        format!("Failed to connect to Docker: {}", e),
                    )
                })
            })
            .await
    }

    /// Ensure the configured image is present, pulling it if allowed
    async fn ensure_image(&self, docker: &Docker) -> Result<()> {
        if docker.inspect_image(&self.config.image).await.is_ok() {
            return Ok(());
        }
        if !self.config.pull_image {
            return Err(Error::unavailable(
                BackendKind::Container.as_str(),
                format!("image {} not present and pulling is disabled", self.config.image),
            ));
        }

        info!("Pulling Docker image: {}", self.config.image);

        let options = CreateImageOptions {
            from_image: self.config.image.clone(),
            ..Default::default()
        };
        let mut stream = docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(Error::unavailable(
                        BackendKind::Container.as_str(),
                        format!("Failed to pull image {}: {}", self.config.image, e),
                    ));
                }
            }
        }

        info!("Image pulled successfully");
        Ok(())
    }

    /// Container definition for one run
    fn container_config(
        &self,
        workspace: &WorkspaceView<'_>,
        cmd: Vec<String>,
        limits: &RunLimits,
        user: Option<String>,
    ) -> Config<String> {
        let mount = Path::new(MOUNT_POINT);
        let env = sandbox_env(mount, CONTAINER_PATH, workspace)
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let memory = limits
            .memory_limit_mb
            .filter(|mb| *mb > 0)
            .and_then(|mb| i64::try_from(mb.saturating_mul(1024 * 1024)).ok());
        let network_mode = if limits.allows_network() { "bridge" } else { "none" };

        Config {
            image: Some(self.config.image.clone()),
            cmd: Some(cmd),
            env: Some(env),
            user,
            working_dir: Some(mount.join(workspace.effective_cwd()).to_string_lossy().to_string()),
            network_disabled: Some(!limits.allows_network()),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{}:rw", workspace.root.display(), MOUNT_POINT)]),
                memory,
                memory_swap: memory,
                nano_cpus: Some((self.config.cpu_limit * 1_000_000_000.0) as i64),
                pids_limit: Some(self.config.pids_limit),
                network_mode: Some(network_mode.to_string()),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                readonly_rootfs: Some(true),
                tmpfs: Some(HashMap::from([("/tmp".to_string(), "rw,size=64m".to_string())])),
                auto_remove: Some(false), // removed manually after reading logs
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn run_container(
        &self,
        workspace: &WorkspaceView<'_>,
        cmd: Vec<String>,
        limits: &RunLimits,
    ) -> Result<RunOutput> {
        let docker = self.docker().await?;
        let name = format!("safeexec-{}", uuid::Uuid::new_v4().simple());
        let user = owner_of(workspace.root).await;
        let config = self.container_config(workspace, cmd, limits, user);

        let create_options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };
        docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| {
                Error::unavailable(
                    BackendKind::Container.as_str(),
                    format!("Failed to create container: {}", e),
                )
            })?;
        debug!("Created container: {}", name);

        let result = self.start_and_collect(docker, &name, limits).await;
        self.remove_container(docker, &name).await;
        result
    }

    async fn start_and_collect(
        &self,
        docker: &Docker,
        name: &str,
        limits: &RunLimits,
    ) -> Result<RunOutput> {
        let start = Instant::now();
        docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                Error::unavailable(
                    BackendKind::Container.as_str(),
                    format!("Failed to start container: {}", e),
                )
            })?;

        let (exit_code, timed_out) =
            match tokio::time::timeout(limits.timeout, wait_for_container(docker, name)).await {
                Ok(code) => (Some(code?), false),
                Err(_) => {
                    warn!(container = name, "Container execution timed out after {:?}", limits.timeout);
                    let kill = KillContainerOptions { signal: "KILL" };
                    if let Err(e) = docker.kill_container(name, Some(kill)).await {
                        debug!("Kill after timeout failed for {}: {}", name, e);
                    }
                    (None, true)
                }
            };
        let duration = start.elapsed();

        let (stdout, stderr) = collect_logs(docker, name, limits.max_output_bytes).await;

        Ok(RunOutput {
            truncated: stdout.truncated() || stderr.truncated(),
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            exit_code,
            timed_out,
            duration,
        })
    }

    async fn remove_container(&self, docker: &Docker, name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match docker.remove_container(name, Some(options)).await {
            Ok(()) => debug!("Removed container: {}", name),
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }
    }
}

/// Wait for a container to finish and return its exit code
async fn wait_for_container(docker: &Docker, name: &str) -> Result<i32> {
    let options = WaitContainerOptions {
        condition: "not-running",
    };

    let mut stream = docker.wait_container(name, Some(options));

    match stream.next().await {
        Some(Ok(response)) => Ok(response.status_code as i32),
        // A non-zero exit arrives as an error carrying the code.
        Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code as i32),
        Some(Err(e)) => Err(Error::Container(format!("Wait failed: {}", e))),
        None => Err(Error::Container("Container wait stream ended".to_string())),
    }
}

async fn collect_logs(docker: &Docker, name: &str, max: usize) -> (CappedBuffer, CappedBuffer) {
    let options = LogsOptions::<String> {
        stdout: true,
        stderr: true,
        ..Default::default()
    };

    let mut stream = docker.logs(name, Some(options));
    let mut stdout = CappedBuffer::new(max);
    let mut stderr = CappedBuffer::new(max);

    while let Some(result) = stream.next().await {
        match result {
            Ok(LogOutput::StdOut { message }) => stdout.push(&message),
            Ok(LogOutput::StdErr { message }) => stderr.push(&message),
            Ok(_) => {}
            Err(e) => {
                warn!("Error reading logs: {}", e);
                break;
            }
        }
    }

    (stdout, stderr)
}

/// `uid:gid` owning the workspace root, so files written in the container
/// stay owned by the host user
#[cfg(unix)]
async fn owner_of(root: &Path) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    let meta = tokio::fs::metadata(root).await.ok()?;
    Some(format!("{}:{}", meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
async fn owner_of(_root: &Path) -> Option<String> {
    None
}

#[async_trait]
impl SandboxBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    fn mount_point(&self, _workspace: &WorkspaceView<'_>) -> PathBuf {
        PathBuf::from(MOUNT_POINT)
    }

    async fn probe(&self) -> Result<()> {
        let docker = self.docker().await?;

        match tokio::time::timeout(self.probe_timeout, docker.ping()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(Error::unavailable(
                    BackendKind::Container.as_str(),
                    format!("Docker ping failed: {}", e),
                ))
            }
            Err(_) => {
                return Err(Error::unavailable(
                    BackendKind::Container.as_str(),
                    "Docker ping timed out",
                ))
            }
        }

        self.ensure_image(docker).await?;
        info!("Container backend connected to Docker (image {})", self.config.image);
        Ok(())
    }

    async fn run_script(
        &self,
        workspace: &WorkspaceView<'_>,
        script: &str,
        limits: &RunLimits,
    ) -> Result<RunOutput> {
        let scratch = ScratchScript::write(workspace.root, script).await?;
        let cmd = vec![
            self.python.clone(),
            scratch.at(Path::new(MOUNT_POINT)).to_string_lossy().to_string(),
        ];
        let result = self.run_container(workspace, cmd, limits).await;
        scratch.remove().await;
        result
    }

    async fn run_shell(
        &self,
        workspace: &WorkspaceView<'_>,
        command: &str,
        limits: &RunLimits,
    ) -> Result<RunOutput> {
        let cmd = vec![self.shell.clone(), "-c".to_string(), command.to_string()];
        self.run_container(workspace, cmd, limits).await
    }
}
