//! Workspace Manager - per-conversation directories and shell state
//!
//! Every conversation id owns a directory under the configured base (see
//! [`ConversationLayout`]). Only its `workspace/` subdirectory is ever
//! mounted into a sandbox; `state.json` and `history.json` stay outside.
//!
//! Workspaces are created on first use and never removed here. Each one sits
//! behind its own async mutex; holding that guard for the duration of a call
//! is what serializes requests within a conversation.

pub mod path;
mod state;

pub use state::ShellState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::config::ConversationLayout;
use crate::error::{Error, Result};

const MAX_HISTORY: usize = 100;
const MAX_HISTORY_COMMAND_CHARS: usize = 200;

/// Shared, lockable handle to one conversation's workspace
pub type WorkspaceHandle = Arc<Mutex<Workspace>>;

/// One executed command, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub kind: String,
    pub command: String,
    pub status: String,
}

/// A conversation's workspace
#[derive(Debug)]
pub struct Workspace {
    id: String,
    root: PathBuf,
    state_path: PathBuf,
    history_path: PathBuf,
    state: ShellState,
    history: VecDeque<HistoryEntry>,
}

impl Workspace {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Absolute (canonical) root directory on the host
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working directory relative to the root
    pub fn cwd(&self) -> &Path {
        &self.state.cwd
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.state.env
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// Borrowed view handed to sandbox backends
    pub fn view(&self) -> WorkspaceView<'_> {
        WorkspaceView {
            root: &self.root,
            cwd: &self.state.cwd,
            env: &self.state.env,
        }
    }

    /// Persist a new working directory. The in-memory value only changes
    /// once the state file has been written.
    pub async fn set_cwd(&mut self, relative: &Path) -> Result<()> {
        let cwd = path::resolve_relative(Path::new(""), relative)?;
        if cwd == self.state.cwd {
            return Ok(());
        }

        let mut next = self.state.clone();
        next.cwd = cwd;
        self.commit(next).await
    }

    /// Persist an environment override (`None` removes it)
    pub async fn set_env(&mut self, key: &str, value: Option<&str>) -> Result<()> {
        if key.is_empty() || key.contains(['=', '\0']) {
            return Err(Error::InvalidInput(format!("Invalid environment variable name: {:?}", key)));
        }

        let mut next = self.state.clone();
        match value {
            Some(v) => next.env.insert(key.to_string(), v.to_string()),
            None => next.env.remove(key),
        };
        self.commit(next).await
    }

    async fn commit(&mut self, mut next: ShellState) -> Result<()> {
        next.updated_at = Some(Utc::now());
        next.save(&self.state_path).await?;
        debug!(conversation = %self.id, cwd = %next.cwd.display(), "Persisted shell state");
        self.state = next;
        Ok(())
    }

    /// Append to the diagnostic history and persist it. A failed write is
    /// logged; history never fails a call.
    pub async fn record(&mut self, kind: impl Into<String>, command: &str, status: impl Into<String>) {
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        let command: String = command.chars().take(MAX_HISTORY_COMMAND_CHARS).collect();
        self.history.push_back(HistoryEntry {
            at: Utc::now(),
            kind: kind.into(),
            command,
            status: status.into(),
        });

        if let Err(e) = state::write_json_atomic(&self.history_path, &self.history).await {
            warn!(conversation = %self.id, "Failed to persist history: {}", e);
        }
    }
}

async fn load_history(path: &Path) -> VecDeque<HistoryEntry> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return VecDeque::new(),
        Err(e) => {
            warn!("Ignoring unreadable history {}: {}", path.display(), e);
            return VecDeque::new();
        }
    };
    match serde_json::from_str::<VecDeque<HistoryEntry>>(&raw) {
        Ok(mut history) => {
            while history.len() > MAX_HISTORY {
                history.pop_front();
            }
            history
        }
        Err(e) => {
            warn!("Ignoring corrupt history {}: {}", path.display(), e);
            VecDeque::new()
        }
    }
}

/// What a backend needs to know about a workspace for one execution
#[derive(Debug, Clone, Copy)]
pub struct WorkspaceView<'a> {
    pub root: &'a Path,
    pub cwd: &'a Path,
    pub env: &'a BTreeMap<String, String>,
}

impl WorkspaceView<'_> {
    /// The stored cwd if it still exists on disk, otherwise the root
    pub fn effective_cwd(&self) -> &Path {
        if self.root.join(self.cwd).is_dir() {
            self.cwd
        } else {
            Path::new("")
        }
    }
}

/// Owns the conversation-id to workspace mapping
pub struct WorkspaceManager {
    base_dir: PathBuf,
    /// The map lock is held only to fetch a slot; each slot is opened once
    workspaces: Mutex<HashMap<String, Arc<OnceCell<WorkspaceHandle>>>>,
}

impl WorkspaceManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        WorkspaceManager {
            base_dir: base_dir.into(),
            workspaces: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Return the workspace for `conversation_id`, creating it on first use.
    /// State left on disk by a previous process is picked up.
    pub async fn resolve(&self, conversation_id: &str) -> Result<WorkspaceHandle> {
        let layout = ConversationLayout::new(&self.base_dir, conversation_id)
            .ok_or_else(|| Error::InvalidInput("Conversation id must not be empty".to_string()))?;

        let slot = {
            let mut workspaces = self.workspaces.lock().await;
            workspaces.entry(conversation_id.to_string()).or_default().clone()
        };
        let handle = slot.get_or_try_init(|| open(conversation_id, &layout)).await?;
        Ok(handle.clone())
    }

    /// Set the working directory of a conversation
    pub async fn update_cwd(&self, conversation_id: &str, relative: &Path) -> Result<()> {
        let handle = self.resolve(conversation_id).await?;
        let mut workspace = handle.lock().await;
        workspace.set_cwd(relative).await
    }

    pub async fn root_path_of(&self, conversation_id: &str) -> Result<PathBuf> {
        let handle = self.resolve(conversation_id).await?;
        let workspace = handle.lock().await;
        Ok(workspace.root().to_path_buf())
    }

    pub async fn cwd_of(&self, conversation_id: &str) -> Result<PathBuf> {
        let handle = self.resolve(conversation_id).await?;
        let workspace = handle.lock().await;
        Ok(workspace.cwd().to_path_buf())
    }

    pub async fn set_env(&self, conversation_id: &str, key: &str, value: Option<&str>) -> Result<()> {
        let handle = self.resolve(conversation_id).await?;
        let mut workspace = handle.lock().await;
        workspace.set_env(key, value).await
    }

    pub async fn env_of(&self, conversation_id: &str) -> Result<BTreeMap<String, String>> {
        let handle = self.resolve(conversation_id).await?;
        let workspace = handle.lock().await;
        Ok(workspace.env().clone())
    }

    pub async fn history_of(&self, conversation_id: &str) -> Result<Vec<HistoryEntry>> {
        let handle = self.resolve(conversation_id).await?;
        let workspace = handle.lock().await;
        Ok(workspace.history().cloned().collect())
    }
}

async fn open(conversation_id: &str, layout: &ConversationLayout) -> Result<WorkspaceHandle> {
    let root = layout.workspace_root();
    tokio::fs::create_dir_all(&root).await.map_err(|e| {
        Error::Internal(format!("Failed to create workspace {}: {}", root.display(), e))
    })?;
    let root = tokio::fs::canonicalize(&root).await?;
    let state_path = layout.state_file();
    let history_path = layout.history_file();

    let state = match ShellState::load(&state_path).await? {
        Some(state) => state,
        None => {
            info!(conversation = conversation_id, root = %root.display(), "Created workspace");
            ShellState::default()
        }
    };
    let history = load_history(&history_path).await;

    Ok(Arc::new(Mutex::new(Workspace {
        id: conversation_id.to_string(),
        root,
        state_path,
        history_path,
        state,
        history,
    })))
}
