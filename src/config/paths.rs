//! Configuration paths
//!
//! Utilities for resolving configuration, state and workspace locations,
//! plus the on-disk layout of a single conversation:
//!
//! ```text
//! <workspace_dir>/c-<id>/          ids made of [A-Za-z0-9_-], at most 64 chars
//! <workspace_dir>/h-<uuid-v5>/     every other id
//!     workspace/                   root visible to sandboxed code
//!     state.json                   cwd and env overrides
//!     history.json                 recent commands
//! ```

use std::path::{Path, PathBuf};
use uuid::Uuid;

const MAX_VERBATIM_ID_LEN: usize = 64;

/// Get the configuration directory
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SAFEEXEC_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir()
        .map(|d| d.join("safeexec"))
        .unwrap_or_else(|| home_relative(&[".config", "safeexec"]))
}

/// Get the main configuration file path
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SAFEEXEC_CONFIG") {
        return PathBuf::from(path);
    }

    config_dir().join("config.json")
}

/// Get the state directory
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SAFEEXEC_STATE_DIR") {
        return PathBuf::from(dir);
    }

    dirs::data_dir()
        .map(|d| d.join("safeexec"))
        .unwrap_or_else(|| home_relative(&[".local", "share", "safeexec"]))
}

/// Get the base directory holding all conversation workspaces
pub fn workspace_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SAFEEXEC_WORKSPACE") {
        return PathBuf::from(dir);
    }

    state_dir().join("conversations")
}

fn home_relative(parts: &[&str]) -> PathBuf {
    match dirs::home_dir() {
        Some(home) => parts.iter().fold(home, |p, part| p.join(part)),
        None => PathBuf::from(".safeexec"),
    }
}

/// Directory name for a conversation id, `None` for a blank id.
///
/// Verbatim and hashed names carry different prefixes, so no id can be
/// chosen to land in another id's directory.
pub fn conversation_dir_name(conversation_id: &str) -> Option<String> {
    if conversation_id.trim().is_empty() {
        return None;
    }

    let verbatim = conversation_id.len() <= MAX_VERBATIM_ID_LEN
        && conversation_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if verbatim {
        Some(format!("c-{}", conversation_id))
    } else {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, conversation_id.as_bytes());
        Some(format!("h-{}", id.simple()))
    }
}

/// Files and directories belonging to one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationLayout {
    dir: PathBuf,
}

impl ConversationLayout {
    /// Layout for `conversation_id` under `base`, `None` for a blank id
    pub fn new(base: &Path, conversation_id: &str) -> Option<Self> {
        conversation_dir_name(conversation_id).map(|name| ConversationLayout {
            dir: base.join(name),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.dir.join("workspace")
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    pub fn history_file(&self) -> PathBuf {
        self.dir.join("history.json")
    }
}
