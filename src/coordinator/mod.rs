//! Execution Coordinator - the entry point for running code on behalf of a conversation
//!
//! A call resolves the conversation's workspace, picks a backend, runs the
//! payload and persists any working-directory change. Calls for the same
//! conversation are serialized by holding the workspace lock throughout.
//!
//! Backend availability failures demote the backend and the step is retried
//! once on the next one. Failures of the user's code are never retried.

mod marker;
mod result;

pub use marker::{shell_escape, CwdMarker};
pub use result::{ErrorKind, ExecutionResult, ExitStatus};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::extract::{Extractor, Fragment, FragmentKind};
use crate::sandbox::{
    BackendSelector, ExecutionLimits, ExecutionRequest, NetworkPolicy, PayloadKind, RunLimits,
    SandboxBackend,
};
use crate::workspace::{path, Workspace, WorkspaceManager};

/// Lifecycle of one executed step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Received,
    WorkspaceResolved,
    BackendSelected,
    Executing,
    Succeeded,
    Failed,
    TimedOut,
    StatePersisted,
    Responded,
}

impl CallPhase {
    fn rank(self) -> u8 {
        match self {
            CallPhase::Received => 0,
            CallPhase::WorkspaceResolved => 1,
            CallPhase::BackendSelected => 2,
            CallPhase::Executing => 3,
            CallPhase::Succeeded | CallPhase::Failed | CallPhase::TimedOut => 4,
            CallPhase::StatePersisted => 5,
            CallPhase::Responded => 6,
        }
    }
}

/// Forward-only phase tracker
#[derive(Debug)]
struct PhaseTracker<'a> {
    conversation: &'a str,
    phase: CallPhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(conversation: &'a str) -> Self {
        PhaseTracker {
            conversation,
            phase: CallPhase::Received,
        }
    }

    /// Move to `next`; requests to move backwards or sideways are ignored
    fn advance(&mut self, next: CallPhase) -> bool {
        if next.rank() <= self.phase.rank() {
            debug!(conversation = self.conversation, from = ?self.phase, to = ?next, "Ignoring phase regression");
            return false;
        }
        debug!(conversation = self.conversation, from = ?self.phase, to = ?next, "Phase");
        self.phase = next;
        true
    }

    #[cfg(test)]
    fn phase(&self) -> CallPhase {
        self.phase
    }
}

/// Runs code and shell commands in per-conversation sandboxes
pub struct ExecutionCoordinator {
    config: SandboxConfig,
    workspaces: Arc<WorkspaceManager>,
    selector: Arc<BackendSelector>,
    extractor: Extractor,
}

impl ExecutionCoordinator {
    /// Build a coordinator with the backends and workspace base from `config`
    pub fn new(config: &SandboxConfig) -> Result<Self> {
        let workspaces = Arc::new(WorkspaceManager::new(&config.workspace_root_base_dir));
        let selector = Arc::new(BackendSelector::from_config(config));
        Self::with_parts(config, workspaces, selector)
    }

    /// Build a coordinator from existing parts
    pub fn with_parts(
        config: &SandboxConfig,
        workspaces: Arc<WorkspaceManager>,
        selector: Arc<BackendSelector>,
    ) -> Result<Self> {
        Ok(ExecutionCoordinator {
            extractor: Extractor::new(&config.install_directives)?,
            config: config.clone(),
            workspaces,
            selector,
        })
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Run Python code (free text with fenced blocks is accepted)
    pub async fn execute_code(
        &self,
        conversation_id: &str,
        code: &str,
        limits: Option<ExecutionLimits>,
    ) -> ExecutionResult {
        let request = ExecutionRequest::new(conversation_id, PayloadKind::Python, code)
            .with_limits(limits.unwrap_or_default());
        self.execute(&request).await
    }

    /// Run a shell command line in the conversation's current directory
    pub async fn execute_shell(
        &self,
        conversation_id: &str,
        command: &str,
        limits: Option<ExecutionLimits>,
    ) -> ExecutionResult {
        let request = ExecutionRequest::new(conversation_id, PayloadKind::Shell, command)
            .with_limits(limits.unwrap_or_default());
        self.execute(&request).await
    }

    /// Execute a request. Always yields a result; errors are folded into it.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let conversation = request.conversation_id.as_str();
        debug!(conversation, kind = %request.kind, "Received execution request");

        if request.text.trim().is_empty() {
            return ExecutionResult::from_error(
                &Error::InvalidInput("Nothing to execute".to_string()),
                "",
            );
        }

        let handle = match self.workspaces.resolve(conversation).await {
            Ok(handle) => handle,
            Err(e) => return ExecutionResult::from_error(&e, ""),
        };
        let mut workspace = handle.lock().await;

        let fragments: Vec<Fragment> = match request.kind {
            PayloadKind::Shell => vec![Fragment {
                kind: FragmentKind::Shell,
                content: request.text.clone(),
            }],
            PayloadKind::Python => self
                .extractor
                .extract(&request.text, FragmentKind::Python)
                .collect(),
        };
        if fragments.is_empty() {
            return ExecutionResult::from_error(
                &Error::InvalidInput("No executable code found".to_string()),
                "",
            );
        }

        let mut combined: Option<ExecutionResult> = None;
        for fragment in &fragments {
            let result = self
                .run_fragment(&mut workspace, fragment, &request.limits)
                .await;
            let stop = !result.is_ok() && fragment.kind != FragmentKind::Install;
            combined = Some(match combined {
                Some(acc) => acc.merge(result),
                None => result,
            });
            if stop {
                debug!(conversation, "Stopping after failed {} fragment", fragment.kind);
                break;
            }
        }

        let mut result = combined.unwrap_or_else(|| {
            ExecutionResult::from_error(&Error::Internal("no fragment ran".to_string()), "")
        });
        result.cwd = Some(display_cwd(workspace.cwd()));
        workspace
            .record(request.kind.to_string(), &request.text, result.exit_status.to_string())
            .await;

        info!(
            conversation,
            status = %result.exit_status,
            backend = %result.backend_used,
            duration_ms = result.duration_ms,
            "Execution finished"
        );
        result
    }

    /// Run one fragment, retrying once on a different backend after an
    /// availability failure
    async fn run_fragment(
        &self,
        workspace: &mut Workspace,
        fragment: &Fragment,
        limits: &ExecutionLimits,
    ) -> ExecutionResult {
        let conversation = workspace.id().to_string();
        let mut phases = PhaseTracker::new(&conversation);
        phases.advance(CallPhase::WorkspaceResolved);
        let run_limits = self.run_limits(fragment.kind, limits);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let backend = match self.selector.select().await {
                Ok(backend) => backend,
                Err(e) => {
                    warn!(conversation = workspace.id(), "No sandbox backend available");
                    return ExecutionResult::from_error(&e, "");
                }
            };
            phases.advance(CallPhase::BackendSelected);

            match self
                .run_on(backend.as_ref(), workspace, fragment, &run_limits, &mut phases)
                .await
            {
                Err(e) if e.is_availability() => {
                    self.selector.demote(backend.kind());
                    if attempt >= 2 {
                        warn!(conversation = workspace.id(), "Retry backend failed too: {}", e);
                        return no_backend_after(&e);
                    }
                    warn!(
                        conversation = workspace.id(),
                        backend = backend.name(),
                        "Backend failed, retrying on the next one: {}",
                        e
                    );
                }
                Err(e) => return ExecutionResult::from_error(&e, ""),
                Ok(result) => {
                    phases.advance(CallPhase::Responded);
                    return result;
                }
            }
        }
    }

    async fn run_on(
        &self,
        backend: &dyn SandboxBackend,
        workspace: &mut Workspace,
        fragment: &Fragment,
        limits: &RunLimits,
        phases: &mut PhaseTracker<'_>,
    ) -> Result<ExecutionResult> {
        let timeout_secs = limits.timeout.as_secs();

        if fragment.kind == FragmentKind::Python {
            phases.advance(CallPhase::Executing);
            let run = backend
                .run_script(&workspace.view(), &fragment.content, limits)
                .await?;
            let result = ExecutionResult::from_run(backend.name(), run, timeout_secs);
            phases.advance(outcome_phase(&result));
            return Ok(result);
        }

        let view = workspace.view();
        let mount = backend.mount_point(&view);
        let start_cwd = view.effective_cwd().to_path_buf();
        path::check_cd_targets(&fragment.content, &start_cwd, &mount)?;

        let marker = CwdMarker::new();
        let script = marker.wrap(&fragment.content, &mount, &start_cwd);

        phases.advance(CallPhase::Executing);
        let run = match backend.run_shell(&view, &script, limits).await {
            Ok(run) => run,
            Err(e) => {
                marker.discard(workspace.root()).await;
                return Err(e);
            }
        };
        let reported = if run.timed_out {
            marker.discard(workspace.root()).await;
            None
        } else {
            marker.take(workspace.root()).await
        };
        let mut result = ExecutionResult::from_run(backend.name(), run, timeout_secs);
        phases.advance(outcome_phase(&result));

        let Some(reported) = reported else {
            debug!(conversation = workspace.id(), "No cwd reported; keeping cwd");
            return Ok(result);
        };

        match path::relative_to_mount(&mount, &reported) {
            Ok(cwd) => {
                if let Err(e) = workspace.set_cwd(&cwd).await {
                    warn!(conversation = workspace.id(), "Failed to persist cwd: {}", e);
                    return Ok(fail(result, &e));
                }
                phases.advance(CallPhase::StatePersisted);
            }
            Err(e) => {
                warn!(
                    conversation = workspace.id(),
                    reported = %reported.display(),
                    "Command left the workspace; cwd not updated"
                );
                result = fail(result, &e);
            }
        }
        Ok(result)
    }

    fn run_limits(&self, kind: FragmentKind, limits: &ExecutionLimits) -> RunLimits {
        let timeout = limits
            .timeout_seconds
            .filter(|s| *s > 0)
            .unwrap_or(self.config.default_timeout_secs);
        let memory = limits
            .memory_limit_mb
            .unwrap_or(self.config.default_memory_limit_mb);
        let network = if kind == FragmentKind::Install && self.config.allow_install_network_egress {
            NetworkPolicy::Allow
        } else {
            NetworkPolicy::Deny
        };

        RunLimits {
            timeout: Duration::from_secs(timeout),
            memory_limit_mb: (memory > 0).then_some(memory),
            max_output_bytes: self.config.max_output_bytes,
            network,
        }
    }
}

fn outcome_phase(result: &ExecutionResult) -> CallPhase {
    match result.exit_status {
        ExitStatus::Ok => CallPhase::Succeeded,
        ExitStatus::Timeout => CallPhase::TimedOut,
        _ => CallPhase::Failed,
    }
}

/// Both the selected backend and its replacement failed to start the step
fn no_backend_after(cause: &Error) -> ExecutionResult {
    let mut result = ExecutionResult::from_error(&Error::NoBackendAvailable, "");
    result.output = format!("{}: {}", Error::NoBackendAvailable, cause);
    result.stderr = result.output.clone();
    result
}

/// Mark an otherwise finished run as failed with `err`, keeping its output
fn fail(mut result: ExecutionResult, err: &Error) -> ExecutionResult {
    let kind = ErrorKind::from(err);
    if result.is_ok() {
        result.exit_status = kind.status();
        result.error_kind = Some(kind);
    }
    if !result.output.is_empty() && !result.output.ends_with('\n') {
        result.output.push('\n');
    }
    result.output.push_str(&err.to_string());
    result.output.push('\n');
    result
}

fn display_cwd(cwd: &Path) -> String {
    PathBuf::from("/").join(cwd).to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::sandbox::testing::FakeBackend;
    use crate::sandbox::{python_available, DirectBackend};
    use tempfile::{tempdir, TempDir};

    fn direct_config(base: &Path) -> SandboxConfig {
        SandboxConfig {
            preferred_backend_order: vec![],
            allow_direct_fallback: true,
            workspace_root_base_dir: base.to_path_buf(),
            default_timeout_secs: 10,
            ..Default::default()
        }
    }

    fn direct_coordinator() -> (TempDir, ExecutionCoordinator) {
        let dir = tempdir().unwrap();
        let coordinator = ExecutionCoordinator::new(&direct_config(dir.path())).unwrap();
        (dir, coordinator)
    }

    fn coordinator_with(
        dir: &TempDir,
        backends: Vec<Arc<dyn SandboxBackend>>,
    ) -> ExecutionCoordinator {
        let config = direct_config(dir.path());
        ExecutionCoordinator::with_parts(
            &config,
            Arc::new(WorkspaceManager::new(dir.path())),
            Arc::new(BackendSelector::new(backends)),
        )
        .unwrap()
    }

    #[test]
    fn test_phase_tracker_only_moves_forward() {
        let mut phases = PhaseTracker::new("c");
        assert!(phases.advance(CallPhase::WorkspaceResolved));
        assert!(phases.advance(CallPhase::Executing));
        assert!(!phases.advance(CallPhase::BackendSelected));
        assert!(phases.advance(CallPhase::Failed));
        assert!(!phases.advance(CallPhase::Succeeded));
        assert_eq!(phases.phase(), CallPhase::Failed);
    }

    #[tokio::test]
    async fn test_cd_persists_across_calls() {
        let (_dir, coordinator) = direct_coordinator();

        let first = coordinator.execute_shell("conv", "mkdir proj && cd proj", None).await;
        assert_eq!(first.exit_status, ExitStatus::Ok, "{}", first.output);
        assert_eq!(first.backend_used, "direct");
        assert_eq!(first.cwd.as_deref(), Some("/proj"));

        let second = coordinator.execute_shell("conv", "pwd", None).await;
        assert!(second.is_ok());
        assert!(second.stdout.trim_end().ends_with("/proj"), "{}", second.stdout);
        assert!(!second.stdout.contains("__SAFEEXEC_CWD_"));
    }

    #[tokio::test]
    async fn test_conversations_are_isolated() {
        let (_dir, coordinator) = direct_coordinator();

        coordinator.execute_shell("a", "mkdir x && cd x", None).await;
        let b = coordinator.execute_shell("b", "pwd", None).await;
        assert!(b.stdout.trim_end().ends_with("/workspace"), "{}", b.stdout);
        assert_eq!(b.cwd.as_deref(), Some("/"));

        let a = coordinator.execute_shell("a", "ls ..", None).await;
        assert_eq!(a.cwd.as_deref(), Some("/x"));
    }

    #[tokio::test]
    async fn test_escape_is_rejected() {
        let (_dir, coordinator) = direct_coordinator();

        let result = coordinator.execute_shell("c", "cd ../../.. && touch escaped", None).await;
        assert_eq!(result.exit_status, ExitStatus::Error);
        assert_eq!(result.error_kind, Some(ErrorKind::WorkspacePathViolation));
        assert_eq!(result.backend_used, "");

        let pwd = coordinator.execute_shell("c", "pwd", None).await;
        assert_eq!(pwd.cwd.as_deref(), Some("/"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_expanded_escape_is_caught_after_run() {
        let (_dir, coordinator) = direct_coordinator();

        let result = coordinator.execute_shell("c", "cd \"$HOME/..\"", None).await;
        assert_eq!(result.error_kind, Some(ErrorKind::WorkspacePathViolation));
        assert_eq!(result.cwd.as_deref(), Some("/"));
    }

    #[tokio::test]
    async fn test_failing_command_keeps_cd() {
        let (_dir, coordinator) = direct_coordinator();

        let result = coordinator
            .execute_shell("c", "mkdir d && cd d && sh -c 'exit 7'", None)
            .await;
        assert_eq!(result.exit_status, ExitStatus::Error);
        assert_eq!(result.exit_code, Some(7));
        assert_eq!(result.error_kind, Some(ErrorKind::NonZeroExit));
        assert_eq!(result.cwd.as_deref(), Some("/d"));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let (_dir, coordinator) = direct_coordinator();

        let limits = ExecutionLimits::default().with_timeout(1);
        let result = coordinator.execute_shell("t", "echo before; sleep 30", Some(limits)).await;
        assert_eq!(result.exit_status, ExitStatus::Timeout);
        assert_eq!(result.error_kind, Some(ErrorKind::ExecutionTimeout));
        assert!(result.stdout.starts_with("before"));
        assert!(result.duration_ms < 10_000);
    }

    #[tokio::test]
    async fn test_python_prints() {
        if !python_available() {
            return;
        }
        let (_dir, coordinator) = direct_coordinator();

        let result = coordinator.execute_code("py", "print('hi')", None).await;
        assert_eq!(result.exit_status, ExitStatus::Ok, "{}", result.output);
        assert_eq!(result.output, "hi\n");
        assert_eq!(result.backend_used, "direct");
    }

    #[tokio::test]
    async fn test_fenced_shell_then_python() {
        if !python_available() {
            return;
        }
        let (_dir, coordinator) = direct_coordinator();

        let text = "Make a file:\n```sh\nmkdir out && cd out && echo data > f.txt\n```\nThen read it:\n```python\nprint(open('f.txt').read().strip())\n```\n";
        let result = coordinator.execute_code("mix", text, None).await;
        assert_eq!(result.exit_status, ExitStatus::Ok, "{}", result.output);
        assert_eq!(result.stdout, "data\n");
        // python starts where the shell fragment left off
        assert_eq!(result.cwd.as_deref(), Some("/out"));
    }

    #[tokio::test]
    async fn test_python_failure_stops_later_fragments() {
        if !python_available() {
            return;
        }
        let (_dir, coordinator) = direct_coordinator();

        let text = "```python\nraise SystemExit(3)\n```\n```python\nprint('unreachable')\n```\n";
        let result = coordinator.execute_code("stop", text, None).await;
        assert_eq!(result.exit_status, ExitStatus::Error);
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.output.contains("unreachable"));
    }

    #[tokio::test]
    async fn test_empty_payloads_are_invalid() {
        let (_dir, coordinator) = direct_coordinator();

        let blank = coordinator.execute_shell("e", "   ", None).await;
        assert_eq!(blank.error_kind, Some(ErrorKind::InvalidInput));

        let prose = coordinator.execute_code("e", "```text\nnot code\n```", None).await;
        assert_eq!(prose.error_kind, Some(ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_no_backend_available() {
        let dir = tempdir().unwrap();
        let broken = Arc::new(FakeBackend::unavailable(BackendKind::Namespace));
        let coordinator = coordinator_with(&dir, vec![broken.clone()]);

        let result = coordinator.execute_shell("n", "echo hi", None).await;
        assert_eq!(result.exit_status, ExitStatus::Unavailable);
        assert_eq!(result.error_kind, Some(ErrorKind::NoBackendAvailable));
        assert_eq!(result.backend_used, "");
        assert_eq!(broken.run_count(), 0);
    }

    #[tokio::test]
    async fn test_demotes_and_retries_on_next_backend() {
        let dir = tempdir().unwrap();
        let flaky = Arc::new(FakeBackend::breaks_on_run(BackendKind::Namespace));
        let direct = Arc::new(DirectBackend::new(&direct_config(dir.path())));
        let coordinator = coordinator_with(&dir, vec![flaky.clone(), direct]);

        let first = coordinator.execute_shell("r", "mkdir p && cd p", None).await;
        assert_eq!(first.exit_status, ExitStatus::Ok, "{}", first.output);
        assert_eq!(first.backend_used, "direct");
        assert_eq!(flaky.run_count(), 1);

        // demotion sticks and cwd carried over
        let second = coordinator.execute_shell("r", "pwd", None).await;
        assert_eq!(second.backend_used, "direct");
        assert_eq!(second.cwd.as_deref(), Some("/p"));
        assert_eq!(flaky.run_count(), 1);
    }

    #[tokio::test]
    async fn test_second_availability_failure_is_unavailable() {
        let dir = tempdir().unwrap();
        let a = Arc::new(FakeBackend::breaks_on_run(BackendKind::Namespace));
        let b = Arc::new(FakeBackend::breaks_on_run(BackendKind::Container));
        let c = Arc::new(FakeBackend::new(BackendKind::Direct));
        let coordinator = coordinator_with(&dir, vec![a.clone(), b.clone(), c.clone()]);

        let result = coordinator.execute_shell("x", "echo hi", None).await;
        assert_eq!(result.exit_status, ExitStatus::Unavailable);
        assert_eq!(result.error_kind, Some(ErrorKind::NoBackendAvailable));
        assert!(result.output.contains("fake setup failure"), "{}", result.output);
        assert_eq!(a.run_count() + b.run_count(), 2);
        assert_eq!(c.run_count(), 0);

        // both are demoted now, so the next call lands on the third
        let next = coordinator.execute_shell("x", "echo hi", None).await;
        assert_eq!(next.backend_used, "direct");
        assert_eq!(c.run_count(), 1);
    }

    #[tokio::test]
    async fn test_cd_survives_truncated_output() {
        let dir = tempdir().unwrap();
        let mut config = direct_config(dir.path());
        config.max_output_bytes = 100;
        let coordinator = ExecutionCoordinator::new(&config).unwrap();

        let result = coordinator
            .execute_shell("big", "mkdir p && cd p && i=0; while [ $i -lt 200 ]; do echo $i; i=$((i+1)); done", None)
            .await;
        assert_eq!(result.exit_status, ExitStatus::Ok, "{}", result.output);
        assert!(result.truncated);
        assert_eq!(result.cwd.as_deref(), Some("/p"));
        assert!(!result.output.contains("cwd-"));

        let pwd = coordinator.execute_shell("big", "pwd", None).await;
        assert!(pwd.stdout.trim_end().ends_with("/p"), "{}", pwd.stdout);
    }

    #[tokio::test]
    async fn test_cwd_reports_do_not_accumulate() {
        let (dir, coordinator) = direct_coordinator();

        coordinator.execute_shell("tidy", "mkdir a && cd a", None).await;
        coordinator.execute_shell("tidy", "exit 3", None).await;
        let limits = ExecutionLimits::default().with_timeout(1);
        coordinator.execute_shell("tidy", "sleep 5", Some(limits)).await;

        let root = coordinator.workspaces().root_path_of("tidy").await.unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(root.join(".safeexec"))
            .map(|entries| entries.filter_map(|e| e.ok()).collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
        drop(dir);
    }

    async fn install_scenario(egress: bool) -> (ExecutionResult, Vec<crate::sandbox::testing::RecordedRun>) {
        let dir = tempdir().unwrap();
        let mut config = direct_config(dir.path());
        config.allow_install_network_egress = egress;
        let backend = Arc::new(FakeBackend::exits_one_on(
            BackendKind::Namespace,
            &["pip install requests", "import requests"],
        ));
        let coordinator = ExecutionCoordinator::with_parts(
            &config,
            Arc::new(WorkspaceManager::new(dir.path())),
            Arc::new(BackendSelector::new(vec![backend.clone()])),
        )
        .unwrap();

        let text = "```python
import requests
!pip install requests
print(requests.__version__)
```";
        let result = coordinator.execute_code("pkg", text, None).await;
        (result, backend.recorded())
    }

    #[tokio::test]
    async fn test_install_runs_first_with_egress() {
        let (result, runs) = install_scenario(true).await;

        assert_eq!(runs.len(), 2);
        assert!(runs[0].shell);
        assert!(runs[0].text.contains("pip install requests"));
        assert_eq!(runs[0].limits.network, NetworkPolicy::Allow);
        assert!(!runs[1].shell);
        assert!(runs[1].text.starts_with("import requests"));
        assert_eq!(runs[1].limits.network, NetworkPolicy::Deny);

        // the failed install did not stop the code, whose own failure is reported
        assert_eq!(result.exit_status, ExitStatus::Error);
        assert_eq!(result.error_kind, Some(ErrorKind::NonZeroExit));
        assert_eq!(result.backend_used, "namespace");
    }

    #[tokio::test]
    async fn test_install_without_egress_stays_offline() {
        let (result, runs) = install_scenario(false).await;

        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.limits.network == NetworkPolicy::Deny));
        assert!(runs[0].text.contains("pip install requests"));
        assert_eq!(result.error_kind, Some(ErrorKind::NonZeroExit));
    }

    #[tokio::test]
    async fn test_history_is_recorded() {
        let (_dir, coordinator) = direct_coordinator();

        coordinator.execute_shell("h", "echo one", None).await;
        coordinator.execute_shell("h", "false", None).await;

        let history = coordinator.workspaces().history_of("h").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].command, "echo one");
        assert_eq!(history[1].status, "error");
    }

    #[test]
    fn test_run_limits_resolution() {
        let dir = tempdir().unwrap();
        let mut config = direct_config(dir.path());
        config.allow_install_network_egress = true;
        let coordinator = ExecutionCoordinator::new(&config).unwrap();

        let limits = coordinator.run_limits(FragmentKind::Install, &ExecutionLimits::default());
        assert_eq!(limits.timeout, Duration::from_secs(10));
        assert_eq!(limits.memory_limit_mb, Some(512));
        assert!(limits.allows_network());

        let limits = coordinator.run_limits(
            FragmentKind::Python,
            &ExecutionLimits::default().with_timeout(3).with_memory_limit(0),
        );
        assert_eq!(limits.timeout, Duration::from_secs(3));
        assert_eq!(limits.memory_limit_mb, None);
        assert!(!limits.allows_network());
    }
}
