//! Configuration validation
//!
//! Validates configuration and reports issues.

use super::types::sandbox::BackendKind;
use super::types::Config;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();
    let sandbox = &config.sandbox;

    let usable_backends = sandbox
        .preferred_backend_order
        .iter()
        .filter(|k| **k != BackendKind::Direct || sandbox.allow_direct_fallback)
        .count();
    if usable_backends == 0 && !sandbox.allow_direct_fallback {
        result = result.with_error(
            ValidationIssue::new("sandbox.preferred_backend_order", "No backend can ever be selected")
                .with_suggestion("List namespace and/or container, or enable allow_direct_fallback"),
        );
    }

    if sandbox.preferred_backend_order.contains(&BackendKind::Direct) && !sandbox.allow_direct_fallback {
        result = result.with_warning(
            ValidationIssue::new(
                "sandbox.preferred_backend_order",
                "'direct' is listed but allow_direct_fallback is false; it will be ignored",
            ),
        );
    }

    if sandbox.allow_direct_fallback {
        result = result.with_warning(
            ValidationIssue::new(
                "sandbox.allow_direct_fallback",
                "Direct fallback gives no network or filesystem isolation beyond the working directory",
            ),
        );
    }

    if sandbox.default_timeout_secs == 0 {
        result = result.with_error(
            ValidationIssue::new("sandbox.default_timeout_secs", "Timeout must be greater than zero"),
        );
    }

    if sandbox.max_output_bytes == 0 {
        result = result.with_error(
            ValidationIssue::new("sandbox.max_output_bytes", "Output buffer must be greater than zero"),
        );
    }

    if sandbox.install_directives.iter().any(|d| d.trim().is_empty()) {
        result = result.with_warning(
            ValidationIssue::new("sandbox.install_directives", "Empty install directives are ignored"),
        );
    }

    if sandbox.preferred_backend_order.contains(&BackendKind::Container)
        && sandbox.container.image.is_empty()
    {
        result = result.with_error(
            ValidationIssue::new(
                "sandbox.container.image",
                "Container backend enabled but no image specified",
            )
            .with_suggestion("Set sandbox.container.image to a valid Docker image"),
        );
    }

    result
}
