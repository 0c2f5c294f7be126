//! Tool system - execution contract, registry, and the per-session orchestrator
//!
//! The orchestrator only needs a [`ToolExecutor`]; [`ToolRegistry`] is the stock
//! executor over registered [`Tool`] implementations.

mod canonical;
mod orchestrator;
mod registry;

pub use canonical::{call_key, canonical_json};
pub use orchestrator::{CalledToolRecord, ToolBatchOutcome, ToolOrchestrator, ToolSession, DEFAULT_MAX_ITERATIONS};
pub use registry::{StaticTool, ToolRegistry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// What a tool call produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Executes tool calls by name.
///
/// Tool-level failures belong in [`ToolOutcome::error`]. Returning `Err` means the
/// executor itself broke and aborts the whole session.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: &Value) -> Result<ToolOutcome>;
}

/// A tool that can be called by the model
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches the model's tool call name)
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// JSON Schema for the arguments
    fn parameters(&self) -> Value;

    /// Run the tool
    async fn execute(&self, arguments: Value) -> std::result::Result<String, eyre::Error>;
}
