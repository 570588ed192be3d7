//! Child process plumbing shared by the process-based backends
//!
//! Children run in their own process group so a timeout can take down the
//! whole tree with one signal. Output is drained continuously and kept up to
//! a byte cap per stream.

use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::BackendKind;
use crate::error::{Error, Result};
use crate::sandbox::executor::{RunLimits, RunOutput};

/// Time allowed for pipes to close after the main child exits
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Byte buffer that keeps the first `max` bytes and remembers overflow
#[derive(Debug)]
pub(crate) struct CappedBuffer {
    buf: Vec<u8>,
    max: usize,
    truncated: bool,
}

impl CappedBuffer {
    pub fn new(max: usize) -> Self {
        CappedBuffer {
            buf: Vec::new(),
            max,
            truncated: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let room = self.max.saturating_sub(self.buf.len());
        if bytes.len() > room {
            self.buf.extend_from_slice(&bytes[..room]);
            self.truncated = true;
        } else {
            self.buf.extend_from_slice(bytes);
        }
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, max: usize) -> CappedBuffer {
    let mut captured = CappedBuffer::new(max);
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => captured.push(&chunk[..n]),
            Err(e) => {
                debug!("Stopped reading child output: {}", e);
                break;
            }
        }
    }
    captured
}

/// Spawn `command`, enforce `limits`, and collect its output.
///
/// Spawn failures that mean the tool is missing or not permitted become
/// `BackendUnavailable` for `backend`.
pub(crate) async fn run_captured(
    backend: BackendKind,
    mut command: Command,
    limits: &RunLimits,
) -> Result<RunOutput> {
    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        command.process_group(0);
        if let Some(mb) = limits.memory_limit_mb.filter(|mb| *mb > 0) {
            let bytes = mb.saturating_mul(1024 * 1024);
            // SAFETY: only async-signal-safe libc calls between fork and exec.
            unsafe {
                command.pre_exec(move || limit_address_space(bytes));
            }
        }
    }

    let program = command.as_std().get_program().to_string_lossy().to_string();
    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| spawn_error(backend, &program, e))?;
    let pid = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("child stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Internal("child stderr not captured".to_string()))?;
    let stdout_task = tokio::spawn(drain(stdout, limits.max_output_bytes));
    let stderr_task = tokio::spawn(drain(stderr, limits.max_output_bytes));

    let (exit_code, timed_out) = match tokio::time::timeout(limits.timeout, child.wait()).await {
        Ok(Ok(status)) => (Some(exit_code_of(status)), false),
        Ok(Err(e)) => return Err(Error::Internal(format!("Failed waiting for {}: {}", program, e))),
        Err(_) => {
            warn!(backend = %backend, "Execution timed out after {:?}", limits.timeout);
            kill_process_group(pid);
            let _ = child.start_kill();
            let _ = child.wait().await;
            (None, true)
        }
    };
    let duration = start.elapsed();

    // Background jobs left in the group keep the pipes open; reap them.
    let readers = async { (stdout_task.await, stderr_task.await) };
    tokio::pin!(readers);
    let (stdout, stderr) = match tokio::time::timeout(DRAIN_GRACE, &mut readers).await {
        Ok(done) => done,
        Err(_) => {
            debug!("Killing leftover processes in group {:?}", pid);
            kill_process_group(pid);
            readers.await
        }
    };
    let stdout = stdout.map_err(|e| Error::Internal(format!("stdout reader failed: {}", e)))?;
    let stderr = stderr.map_err(|e| Error::Internal(format!("stderr reader failed: {}", e)))?;

    Ok(RunOutput {
        truncated: stdout.truncated() || stderr.truncated(),
        stdout: stdout.into_string(),
        stderr: stderr.into_string(),
        exit_code,
        timed_out,
        duration,
    })
}

fn spawn_error(backend: BackendKind, program: &str, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            Error::unavailable(backend.as_str(), format!("cannot spawn {}: {}", program, err))
        }
        _ => Error::Internal(format!("Failed to spawn {}: {}", program, err)),
    }
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
        // ESRCH just means the group is already gone.
        unsafe {
            libc::killpg(pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(unix)]
fn limit_address_space(bytes: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
