//! Custom error types for the loop engine.
//!
//! This module provides structured error types that let the engine tell a
//! rejected file apart from a failed generation call or a broken project
//! directory, and decide how to react to each.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ralph-ollama operations
#[derive(Error, Debug)]
pub enum RalphError {
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
    // Loop Execution Errors
    // =========================================================================
    /// Loop execution failed
    #[error("Loop execution error: {message}")]
    Loop { message: String },

    /// `start()` called while the worker is still alive
    #[error("Loop is already running")]
    AlreadyRunning,

    /// The generation collaborator failed (unreachable, missing model, timeout)
    #[error("Generation failed: {message}")]
    Generation { message: String },

    // =========================================================================
    // Generated Content Errors
    // =========================================================================
    /// Generated file rejected before write
    #[error("Validation failed for {path}: {}", .errors.join("; "))]
    Validation { path: String, errors: Vec<String> },

    /// Generated path would land outside the project root
    #[error("Path escapes project root: {path}")]
    PathEscape { path: String },

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

impl RalphError {
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

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a loop error
    pub fn loop_error(message: impl Into<String>) -> Self {
        Self::Loop {
            message: message.into(),
        }
    }

    /// Create a generation error
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Create a path escape error
    pub fn path_escape(path: impl Into<String>) -> Self {
        Self::PathEscape { path: path.into() }
    }

    /// Create a validation error for a rejected generated file
    pub fn validation(path: impl Into<String>, errors: Vec<String>) -> Self {
        Self::Validation {
            path: path.into(),
            errors,
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error comes from generated content rather than the
    /// environment. Such errors never halt the loop on their own.
    pub fn is_content_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::PathEscape { .. })
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Generation { .. } => 3,
            Self::AlreadyRunning => 4,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for ralph-ollama results
pub type Result<T> = std::result::Result<T, RalphError>;
