//! Normalized execution results

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::sandbox::RunOutput;

/// Coarse outcome reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitStatus {
    Ok,
    Error,
    Timeout,
    Unavailable,
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Ok => write!(f, "ok"),
            ExitStatus::Error => write!(f, "error"),
            ExitStatus::Timeout => write!(f, "timeout"),
            ExitStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Precise failure class behind a non-ok status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NonZeroExit,
    ExecutionTimeout,
    BackendUnavailable,
    NoBackendAvailable,
    WorkspacePathViolation,
    InvalidInput,
    InternalError,
}

impl ErrorKind {
    pub fn status(self) -> ExitStatus {
        match self {
            ErrorKind::ExecutionTimeout => ExitStatus::Timeout,
            ErrorKind::BackendUnavailable | ErrorKind::NoBackendAvailable => ExitStatus::Unavailable,
            ErrorKind::NonZeroExit
            | ErrorKind::WorkspacePathViolation
            | ErrorKind::InvalidInput
            | ErrorKind::InternalError => ExitStatus::Error,
        }
    }
}

impl From<&Error> for ErrorKind {
    fn from(err: &Error) -> Self {
        match err {
            Error::NoBackendAvailable => ErrorKind::NoBackendAvailable,
            Error::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Error::WorkspacePathViolation(_) => ErrorKind::WorkspacePathViolation,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::InternalError,
        }
    }
}

/// The response to every execute call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// stdout and stderr combined, with notices appended
    pub output: String,
    pub exit_status: ExitStatus,
    /// Backend that ran the last step; empty when nothing ran
    pub backend_used: String,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub truncated: bool,
    /// Working directory after the call, relative to the workspace root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl ExecutionResult {
    /// Translate a finished run
    pub fn from_run(backend: &str, run: RunOutput, timeout_secs: u64) -> Self {
        let error_kind = if run.timed_out {
            Some(ErrorKind::ExecutionTimeout)
        } else if run.exit_code != Some(0) {
            Some(ErrorKind::NonZeroExit)
        } else {
            None
        };

        let mut output = combine(&run.stdout, &run.stderr);
        if run.truncated {
            push_notice(&mut output, "[output truncated]");
        }
        if run.timed_out {
            push_notice(&mut output, &format!("[timed out after {}s]", timeout_secs));
        }

        ExecutionResult {
            output,
            exit_status: error_kind.map_or(ExitStatus::Ok, ErrorKind::status),
            backend_used: backend.to_string(),
            duration_ms: run.duration.as_millis() as u64,
            stdout: run.stdout,
            stderr: run.stderr,
            exit_code: run.exit_code,
            error_kind,
            truncated: run.truncated,
            cwd: None,
        }
    }

    /// Translate an error raised before or instead of a run
    pub fn from_error(err: &Error, backend: &str) -> Self {
        let kind = ErrorKind::from(err);
        ExecutionResult {
            output: err.to_string(),
            exit_status: kind.status(),
            backend_used: backend.to_string(),
            duration_ms: 0,
            stdout: String::new(),
            stderr: err.to_string(),
            exit_code: None,
            error_kind: Some(kind),
            truncated: false,
            cwd: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.exit_status == ExitStatus::Ok
    }

    /// Fold the result of a later fragment into this one. The first
    /// non-ok status wins; output and timings accumulate.
    pub fn merge(mut self, next: ExecutionResult) -> Self {
        if self.is_ok() && !next.is_ok() {
            self.exit_status = next.exit_status;
            self.error_kind = next.error_kind;
            self.exit_code = next.exit_code;
        } else if self.is_ok() {
            self.exit_code = next.exit_code;
        }

        self.output.push_str(&next.output);
        self.stdout.push_str(&next.stdout);
        self.stderr.push_str(&next.stderr);
        self.duration_ms += next.duration_ms;
        self.truncated |= next.truncated;
        if !next.backend_used.is_empty() {
            self.backend_used = next.backend_used;
        }
        if next.cwd.is_some() {
            self.cwd = next.cwd;
        }
        self
    }
}

fn combine(stdout: &str, stderr: &str) -> String {
    let mut output = stdout.to_string();
    if !stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(stderr);
    }
    output
}

fn push_notice(output: &mut String, notice: &str) {
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(notice);
    output.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn run(stdout: &str, stderr: &str, exit_code: Option<i32>) -> RunOutput {
        RunOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
            timed_out: exit_code.is_none(),
            truncated: false,
            duration: Duration::from_millis(12),
        }
    }

    #[test]
    fn test_success_output_is_verbatim() {
        let result = ExecutionResult::from_run("namespace", run("hi\n", "", Some(0)), 30);
        assert_eq!(result.output, "hi\n");
        assert_eq!(result.exit_status, ExitStatus::Ok);
        assert_eq!(result.error_kind, None);
        assert_eq!(result.duration_ms, 12);
    }

    #[test]
    fn test_failure_and_timeout_classification() {
        let failed = ExecutionResult::from_run("direct", run("", "boom\n", Some(2)), 30);
        assert_eq!(failed.exit_status, ExitStatus::Error);
        assert_eq!(failed.error_kind, Some(ErrorKind::NonZeroExit));
        assert_eq!(failed.output, "boom\n");

        let timed_out = ExecutionResult::from_run("direct", run("partial", "", None), 2);
        assert_eq!(timed_out.exit_status, ExitStatus::Timeout);
        assert_eq!(timed_out.output, "partial\n[timed out after 2s]\n");
    }

    #[test]
    fn test_error_mapping() {
        let unavailable = ExecutionResult::from_error(&Error::NoBackendAvailable, "");
        assert_eq!(unavailable.exit_status, ExitStatus::Unavailable);
        assert!(unavailable.backend_used.is_empty());

        let violation =
            ExecutionResult::from_error(&Error::WorkspacePathViolation("..".into()), "namespace");
        assert_eq!(violation.exit_status, ExitStatus::Error);
        assert_eq!(violation.error_kind, Some(ErrorKind::WorkspacePathViolation));
    }

    #[test]
    fn test_merge_keeps_first_failure() {
        let install = ExecutionResult::from_run("container", run("", "no network\n", Some(1)), 30);
        let code = ExecutionResult::from_run("container", run("", "ModuleNotFoundError\n", Some(1)), 30);
        let ok = ExecutionResult::from_run("container", run("done\n", "", Some(0)), 30);

        let merged = ok.clone().merge(install).merge(code);
        assert_eq!(merged.exit_status, ExitStatus::Error);
        assert_eq!(merged.output, "done\nno network\nModuleNotFoundError\n");
        assert_eq!(merged.duration_ms, 36);

        let all_ok = ok.clone().merge(ok);
        assert!(all_ok.is_ok());
    }

    #[test]
    fn test_wire_format() {
        let result = ExecutionResult::from_run("namespace", run("hi\n", "", Some(0)), 30);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["exitStatus"], "ok");
        assert_eq!(json["backendUsed"], "namespace");
        assert_eq!(json["durationMs"], 12);
        assert_eq!(json["exitCode"], 0);
        assert!(json.get("errorKind").is_none());
    }
}
