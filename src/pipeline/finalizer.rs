//! Structured-output finalization.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::StreamProcessor;
use crate::error::{Result, UnillmError, ValidationIssue};
use crate::schema::SchemaValidator;
use crate::types::{FinishReason, StreamChunk};

/// Parses and validates the accumulated text of a JSON-output turn.
///
/// Only acts on a terminal chunk without tool calls. A parse or validation failure
/// never errors the stream: it is reported through `metadata.validation_errors` and a
/// `ContentFilter` finish reason.
pub struct ResponseFinalizer {
    schema: Option<Value>,
    validator: Arc<dyn SchemaValidator>,
}

impl ResponseFinalizer {
    pub fn new(schema: Option<Value>, validator: Arc<dyn SchemaValidator>) -> Self {
        Self { schema, validator }
    }

    fn finalize(&self, text: &str) -> std::result::Result<Value, Vec<ValidationIssue>> {
        let value: Value = serde_json::from_str(strip_code_fence(text))
            .map_err(|e| vec![ValidationIssue::new("$", format!("invalid JSON: {}", e))])?;

        match &self.schema {
            None => Ok(value),
            Some(schema) => self.validator.validate(&value, schema).map_err(|e| match e {
                UnillmError::Validation { issues, .. } => issues,
                other => vec![ValidationIssue::new("$", other.to_string())],
            }),
        }
    }
}

/// Models often wrap JSON in a markdown fence even when asked not to.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[async_trait]
impl StreamProcessor for ResponseFinalizer {
    fn name(&self) -> &'static str {
        "response_finalizer"
    }

    async fn process(&mut self, mut chunk: StreamChunk) -> Result<StreamChunk> {
        if !chunk.is_complete || !chunk.tool_calls.is_empty() {
            return Ok(chunk);
        }

        let text = chunk
            .metadata
            .accumulated_content
            .clone()
            .or_else(|| chunk.content.clone())
            .unwrap_or_default();

        match self.finalize(&text) {
            Ok(object) => chunk.content_object = Some(object),
            Err(issues) => {
                log::warn!("structured output rejected with {} issues", issues.len());
                chunk.metadata.validation_errors = issues;
                chunk.metadata.finish_reason = Some(FinishReason::ContentFilter);
            }
        }
        Ok(chunk)
    }
}
