//! # SafeExec
//!
//! Sandboxed, per-conversation execution of Python code and shell commands
//! for language-model agents.
//!
//! ## Features
//!
//! - **Multiple isolation backends:** bubblewrap namespaces, Docker containers, or an opt-in direct fallback
//! - **Persistent workspaces:** files, installed packages and the working directory survive between calls
//! - **Automatic fallback:** unavailable backends are demoted and the call is retried on the next one
//! - **Code extraction:** fenced blocks and `pip install` lines are pulled out of free-form text

pub mod config;
pub mod coordinator;
pub mod error;
pub mod extract;
pub mod logging;
pub mod sandbox;
pub mod workspace;

pub use config::Config;
pub use coordinator::{ExecutionCoordinator, ExecutionResult, ExitStatus};
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
