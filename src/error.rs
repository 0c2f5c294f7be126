//! Error types for unillm
//!
//! Centralized error handling using thiserror.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single schema violation: where it happened and what was wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// All error types that can occur while streaming or orchestrating tools
#[derive(Debug, Error)]
pub enum UnillmError {
    /// Network or connection failure talking to the provider
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider asked us to slow down
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Provider returned a non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The request itself is malformed; repeating it cannot help
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Output or input failed schema validation
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        issues: Vec<ValidationIssue>,
    },

    /// Synthetic failure raised when a completed response looks unusable
    #[error("Content quality check failed: {0}")]
    ContentQuality(String),

    /// Every attempt failed; carries the last underlying failure
    #[error("Failed after {attempts} attempts. Last error: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<UnillmError>,
    },

    /// The session requested more tool batches than allowed
    #[error("Tool iteration limit of {limit} exceeded")]
    ToolIterationLimit { limit: usize },

    /// The tool executor itself failed (not a tool-reported error)
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// A continuation stream after tool execution could not be obtained
    #[error("Continuation stream failed: {0}")]
    ContinuationAcquisition(String),

    /// History store rejected a write or read
    #[error("History error: {0}")]
    History(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UnillmError {
    /// Build a validation error from a list of issues.
    pub fn validation(issues: Vec<ValidationIssue>) -> Self {
        let message = issues
            .iter()
            .map(|i| format!("{}: {}", i.path, i.message))
            .collect::<Vec<_>>()
            .join("; ");
        UnillmError::Validation { message, issues }
    }

    /// True for errors that describe a request which cannot become valid by repeating it.
    pub fn is_validation(&self) -> bool {
        matches!(self, UnillmError::Validation { .. } | UnillmError::InvalidRequest(_))
    }

    /// True for errors a fresh attempt of the same request may get past.
    pub fn is_retryable(&self) -> bool {
        if self.is_validation() {
            return false;
        }
        match self {
            UnillmError::Transport(_) => true,
            UnillmError::RateLimited { .. } => true,
            UnillmError::Api { .. } => true,
            UnillmError::ContentQuality(_) => true,
            UnillmError::InvalidRequest(_) | UnillmError::Validation { .. } => false,
            UnillmError::RetriesExhausted { .. } => false,
            UnillmError::ToolIterationLimit { .. } => false,
            UnillmError::ToolExecution { .. } => false,
            UnillmError::ContinuationAcquisition(_) => true,
            UnillmError::History(_) => false,
            UnillmError::Json(_) => true,
        }
    }
}

/// Result type alias for unillm operations
pub type Result<T> = std::result::Result<T, UnillmError>;
