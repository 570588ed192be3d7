//! Working-directory tracking for shell commands
//!
//! A command is wrapped so it starts in the stored directory and, once the
//! user text has run, writes `pwd -P` to a per-call file under the
//! workspace's `.safeexec/` directory. The file is read and removed on the
//! host, so the report never shares the capped output streams.

use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const REPORT_DIR: &str = ".safeexec";

/// Longest report accepted; anything bigger was not written by `pwd`
const MAX_REPORT_BYTES: u64 = 4096;

/// Per-call unique report file
#[derive(Debug, Clone)]
pub struct CwdMarker {
    name: String,
}

impl Default for CwdMarker {
    fn default() -> Self {
        Self::new()
    }
}

impl CwdMarker {
    pub fn new() -> Self {
        CwdMarker {
            name: format!("cwd-{}", Uuid::new_v4().simple()),
        }
    }

    /// Wrap `command` to run in `mount/cwd` and report where it ended up.
    /// The wrapper exits with the user command's status.
    pub fn wrap(&self, command: &str, mount: &Path, cwd: &Path) -> String {
        let start = mount.join(cwd);
        let report_dir = mount.join(REPORT_DIR);
        format!(
            "cd -- {start} 2>/dev/null || cd -- {mount}\n\
             {command}\n\
             __safeexec_rc=$?\n\
             {{ mkdir -p -- {dir} && pwd -P > {file}; }} 2>/dev/null\n\
             exit $__safeexec_rc\n",
            start = shell_escape(&start.to_string_lossy()),
            mount = shell_escape(&mount.to_string_lossy()),
            command = command,
            dir = shell_escape(&report_dir.to_string_lossy()),
            file = shell_escape(&report_dir.join(&self.name).to_string_lossy()),
        )
    }

    /// Read and delete the report left in the workspace at `root` (host
    /// path). `None` when the command exited before reporting or the file
    /// is not a plain single-line report.
    pub async fn take(&self, root: &Path) -> Option<PathBuf> {
        let dir = root.join(REPORT_DIR);
        let file = dir.join(&self.name);
        let reported = read_report(&dir, &file).await;
        self.discard(root).await;
        reported
    }

    /// Delete the report without reading it
    pub async fn discard(&self, root: &Path) {
        let file = root.join(REPORT_DIR).join(&self.name);
        if let Err(e) = tokio::fs::remove_file(&file).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Failed to remove cwd report {}: {}", file.display(), e);
            }
        }
    }
}

async fn read_report(dir: &Path, file: &Path) -> Option<PathBuf> {
    // Sandboxed code can swap either path for a symlink.
    let dir_meta = tokio::fs::symlink_metadata(dir).await.ok()?;
    let file_meta = tokio::fs::symlink_metadata(file).await.ok()?;
    if !dir_meta.is_dir() || !file_meta.is_file() || file_meta.len() > MAX_REPORT_BYTES {
        return None;
    }

    let raw = tokio::fs::read_to_string(file).await.ok()?;
    let line = raw.strip_suffix('\n').unwrap_or(&raw);
    if line.is_empty() || line.contains('\n') {
        return None;
    }
    Some(PathBuf::from(line))
}

/// Quote `s` for POSIX sh using single quotes
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
