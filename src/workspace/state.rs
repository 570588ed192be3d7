//! Persisted shell state for a conversation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;

/// The record written to `state.json` next to a workspace root
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShellState {
    /// Working directory relative to the workspace root
    #[serde(default)]
    pub cwd: PathBuf,
    /// Environment overrides applied to every execution
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Last successful write
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ShellState {
    /// Load a state file; a missing file yields `None`.
    ///
    /// A recorded cwd that is not a clean relative path is reset to the root.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut state: ShellState = serde_json::from_str(&raw)?;
        match super::path::resolve_relative(Path::new(""), &state.cwd) {
            Ok(clean) => state.cwd = clean,
            Err(e) => {
                warn!("Resetting invalid cwd in {}: {}", path.display(), e);
                state.cwd = PathBuf::new();
            }
        }
        Ok(Some(state))
    }

    /// Write the state atomically
    pub async fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self).await
    }
}

/// Serialize `value` to a temporary file next to `path`, then rename it over
pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));

    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
