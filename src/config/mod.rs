//! Configuration module
//!
//! - types/mod.rs: top-level Config, logging and gateway sections
//! - types/sandbox.rs: backend, workspace and limit settings
//! - io.rs: loading, env overrides and saving
//! - validation.rs: configuration validation
//! - paths.rs: configuration, state and per-conversation paths

mod io;
pub(crate) mod paths;
mod types;
mod validation;

pub use types::{Config, GatewayConfig, LoggingConfig};

pub use types::sandbox::{BackendKind, ContainerConfig, NamespaceConfig, SandboxConfig};

pub use io::{apply_env_overrides, load_config, load_config_from_path, parse_config, save_config};
pub use paths::{
    config_dir, config_path, conversation_dir_name, state_dir, workspace_dir, ConversationLayout,
};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
