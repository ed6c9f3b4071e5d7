//! Error taxonomy for orchestrator operations.
//!
//! Unsupported operations are deliberately absent here: a missing handler is
//! reported as a failed [`CommandResult`](crate::commands::CommandResult), not
//! as an error value.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::PlatformType;

/// Result alias used across `berth-core`.
pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A service, environment or platform could not be resolved from config.
    #[error("{message}\n\nSuggestion: {suggestion}")]
    Configuration { message: String, suggestion: String },

    /// Credentials for a platform are missing or invalid.
    #[error("credential check failed: {message}")]
    Credential {
        message: String,
        requires_action: Option<String>,
    },

    /// An underlying process or SDK call made by a handler failed.
    #[error("{operation} failed for service '{service}' on {platform}: {message}")]
    ExternalOperation {
        service: String,
        platform: PlatformType,
        operation: String,
        message: String,
    },

    /// A bounded wait exhausted its retry budget.
    #[error("timed out waiting for {operation} after {attempts} attempts")]
    Timeout { operation: String, attempts: u32 },

    /// Strict registration found an existing handler under the same key.
    #[error("handler '{key}' is already registered for platform {platform}")]
    DuplicateHandler { platform: PlatformType, key: String },

    /// Raw command input was rejected by the command schema.
    #[error("invalid options for '{command}': {message}")]
    Validation { command: String, message: String },

    /// A command definition was built without required parts.
    #[error("command definition is missing: {}", missing.join(", "))]
    InvalidCommand { missing: Vec<&'static str> },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn configuration(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn external(
        service: impl Into<String>,
        platform: PlatformType,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ExternalOperation {
            service: service.into(),
            platform,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn validation(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Remediation guidance, when the error carries any.
    pub fn requires_action(&self) -> Option<&str> {
        match self {
            Self::Configuration { suggestion, .. } => Some(suggestion),
            Self::Credential {
                requires_action, ..
            } => requires_action.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_includes_suggestion() {
        let err = OrchestratorError::configuration(
            "Service 'backend' has no platform in environment 'local'",
            r#"{ "platform": { "type": "container" } }"#,
        );
        let rendered = err.to_string();
        assert!(rendered.contains("backend"));
        assert!(rendered.contains("Suggestion"));
        assert!(err.requires_action().is_some());
    }

    #[test]
    fn test_invalid_command_lists_missing_parts() {
        let err = OrchestratorError::InvalidCommand {
            missing: vec!["name", "handler"],
        };
        assert_eq!(
            err.to_string(),
            "command definition is missing: name, handler"
        );
    }

    #[test]
    fn test_external_operation_context() {
        let err = OrchestratorError::external(
            "database",
            PlatformType::Container,
            "start",
            "exit status 125",
        );
        let rendered = err.to_string();
        assert!(rendered.contains("start failed for service 'database' on container"));
        assert!(err.requires_action().is_none());
    }
}
