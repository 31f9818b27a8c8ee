//! Custom error types for Patcher.
//!
//! Errors are split by where they originate: configuration, the
//! source-control host, the generation collaborator, the persisted progress
//! record, and the check system. The orchestrator converts every one of these
//! into a structured outcome at its boundary, so nothing here ever reaches
//! the component that delivered the trigger.

use std::path::PathBuf;
use thiserror::Error;

use crate::state::StepStatus;

/// Main error type for Patcher operations
#[derive(Error, Debug)]
pub enum PatcherError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // External Service Errors
    // =========================================================================
    /// Source-control host call failed
    #[error("Source control operation failed: {operation} - {message}")]
    SourceControl { operation: String, message: String },

    /// Check system could not be queried
    #[error("Check status unavailable for change #{change}: {message}")]
    Checks { change: u64, message: String },

    /// Generation or critique collaborator failed
    #[error("Collaborator '{stage}' failed: {message}")]
    Collaborator { stage: String, message: String },

    // =========================================================================
    // Progress Record Errors
    // =========================================================================
    /// A change artifact carries no progress record
    #[error("No progress record found on change #{change}")]
    StateMissing { change: u64 },

    /// Step status update that the lifecycle does not allow
    #[error("Illegal step transition: {from} -> {to}")]
    InvalidTransition { from: StepStatus, to: StepStatus },

    /// Update of the current step requested on a record without steps
    #[error("Progress record for request #{request} has no steps")]
    NoSteps { request: u64 },

    // =========================================================================
    // Event Errors
    // =========================================================================
    /// Trigger payload is missing a field the orchestrator depends on
    #[error("Malformed '{kind}' payload: {reason}")]
    MalformedPayload { kind: String, reason: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PatcherError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a source-control error
    pub fn source_control(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceControl {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a collaborator error
    pub fn collaborator(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create a malformed payload error
    pub fn malformed(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error came from a service outside the process
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::SourceControl { .. } | Self::Checks { .. } | Self::Collaborator { .. }
        )
    }

    /// Check if this error describes a broken progress record
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::StateMissing { .. } | Self::InvalidTransition { .. } | Self::NoSteps { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SourceControl { .. } | Self::Checks { .. } => 2,
            Self::Collaborator { .. } => 3,
            Self::StateMissing { .. } | Self::InvalidTransition { .. } | Self::NoSteps { .. } => 4,
            Self::MalformedPayload { .. } => 5,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for Patcher results
pub type Result<T> = std::result::Result<T, PatcherError>;

/// Extension trait for converting collaborator `anyhow` errors to [`PatcherError`]
pub trait IntoPatcherError<T> {
    fn into_source_control(self, operation: &str) -> Result<T>;
    fn into_collaborator(self, stage: &str) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoPatcherError<T> for std::result::Result<T, E> {
    fn into_source_control(self, operation: &str) -> Result<T> {
        self.map_err(|e| PatcherError::source_control(operation, format!("{:#}", e.into())))
    }

    fn into_collaborator(self, stage: &str) -> Result<T> {
        self.map_err(|e| PatcherError::collaborator(stage, format!("{:#}", e.into())))
    }
}
