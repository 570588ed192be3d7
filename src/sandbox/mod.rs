//! Sandbox module - isolated execution backends
//!
//! Provides three backends behind one contract:
//! - Namespace: bubblewrap with fresh namespaces and a read-only system view
//! - Container: ephemeral Docker containers
//! - Direct: plain subprocess in the workspace, opt-in only

mod container;
mod direct;
mod executor;
mod namespace;
mod process;
mod selector;

pub use container::ContainerBackend;
pub use direct::DirectBackend;
pub use executor::{
    ExecutionLimits, ExecutionRequest, NetworkPolicy, PayloadKind, RunLimits, RunOutput,
    SandboxBackend,
};
pub use namespace::NamespaceBackend;
pub use selector::{BackendDescriptor, BackendSelector};

#[cfg(test)]
pub(crate) use direct::python_available;

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend for selector and coordinator tests

    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::{RunLimits, RunOutput, SandboxBackend};
    use crate::config::BackendKind;
    use crate::error::{Error, Result};
    use crate::workspace::WorkspaceView;

    /// One run as the backend saw it
    #[derive(Debug, Clone)]
    pub struct RecordedRun {
        pub shell: bool,
        pub text: String,
        pub limits: RunLimits,
    }

    pub struct FakeBackend {
        kind: BackendKind,
        probe_ok: bool,
        fail_runs: bool,
        /// Runs whose text contains one of these exit with status 1
        exit_one_on: Vec<String>,
        probes: AtomicUsize,
        runs: AtomicUsize,
        recorded: Mutex<Vec<RecordedRun>>,
    }

    impl FakeBackend {
        pub fn new(kind: BackendKind) -> Self {
            FakeBackend {
                kind,
                probe_ok: true,
                fail_runs: false,
                exit_one_on: Vec::new(),
                probes: AtomicUsize::new(0),
                runs: AtomicUsize::new(0),
                recorded: Mutex::new(Vec::new()),
            }
        }

        /// Runs normally, except text containing any of `needles` exits 1
        pub fn exits_one_on(kind: BackendKind, needles: &[&str]) -> Self {
            FakeBackend {
                exit_one_on: needles.iter().map(|n| n.to_string()).collect(),
                ..Self::new(kind)
            }
        }

        /// Fails its probe
        pub fn unavailable(kind: BackendKind) -> Self {
            FakeBackend {
                probe_ok: false,
                ..Self::new(kind)
            }
        }

        /// Probes fine, then reports every run as a setup failure
        pub fn breaks_on_run(kind: BackendKind) -> Self {
            FakeBackend {
                fail_runs: true,
                ..Self::new(kind)
            }
        }

        pub fn probe_count(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }

        pub fn run_count(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }

        pub fn recorded(&self) -> Vec<RecordedRun> {
            self.recorded.lock().unwrap().clone()
        }

        fn run(&self, shell: bool, text: &str, limits: &RunLimits) -> Result<RunOutput> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.recorded.lock().unwrap().push(RecordedRun {
                shell,
                text: text.to_string(),
                limits: *limits,
            });
            if self.fail_runs {
                return Err(Error::unavailable(self.kind.as_str(), "fake setup failure"));
            }
            if self.exit_one_on.iter().any(|n| text.contains(n.as_str())) {
                return Ok(RunOutput {
                    stderr: "fake failure\n".to_string(),
                    exit_code: Some(1),
                    ..Default::default()
                });
            }
            Ok(RunOutput {
                stdout: "fake\n".to_string(),
                exit_code: Some(0),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl SandboxBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn mount_point(&self, _workspace: &WorkspaceView<'_>) -> PathBuf {
            PathBuf::from("/fake")
        }

        async fn probe(&self) -> Result<()> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.probe_ok {
                Ok(())
            } else {
                Err(Error::unavailable(self.kind.as_str(), "fake probe failure"))
            }
        }

        async fn run_script(&self, _: &WorkspaceView<'_>, script: &str, limits: &RunLimits) -> Result<RunOutput> {
            self.run(false, script, limits)
        }

        async fn run_shell(&self, _: &WorkspaceView<'_>, command: &str, limits: &RunLimits) -> Result<RunOutput> {
            self.run(true, command, limits)
        }
    }
}
