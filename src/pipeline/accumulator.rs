//! Content accumulation and tool-call reassembly.
//!
//! Tool-call fragments arrive keyed by index, possibly interleaved with text and
//! with `id`/`name` before any argument text. Each index gets a builder; builders
//! are promoted to `ToolCall`s on the terminal chunk or a `tool_calls` finish reason.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::Value;

use super::StreamProcessor;
use crate::error::Result;
use crate::types::{FinishReason, StreamChunk, ToolCall, ToolCallChunk};

/// Reassembles one tool call from its fragments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallBuilder {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

impl ToolCallBuilder {
    /// Fold a fragment in. `id` and `name` are recorded the first time they appear.
    pub fn absorb(&mut self, chunk: &ToolCallChunk) {
        if self.id.is_none() {
            self.id = chunk.id.clone().filter(|s| !s.is_empty());
        }
        if self.name.is_none() {
            self.name = chunk.name.clone().filter(|s| !s.is_empty());
        }
        if let Some(fragment) = &chunk.arguments_chunk {
            self.arguments.push_str(fragment);
        }
    }

    /// Parsed arguments; empty argument text means no arguments.
    fn parsed_arguments(&self) -> Option<Value> {
        if self.arguments.trim().is_empty() {
            return Some(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments).ok()
    }

    /// Complete once a name is known and the argument text is valid JSON
    pub fn is_complete(&self) -> bool {
        self.name.is_some() && self.parsed_arguments().is_some()
    }

    /// Build the call, or `None` if incomplete
    pub fn build(&self, index: usize) -> Option<ToolCall> {
        let name = self.name.clone()?;
        let arguments = self.parsed_arguments()?;
        let id = self.id.clone().unwrap_or_else(|| format!("call_{}", index));
        Some(ToolCall::new(id, name, arguments))
    }
}

/// Accumulates text, reasoning and tool calls for one turn
#[derive(Debug, Default)]
pub struct ContentAccumulator {
    text: String,
    reasoning: String,
    builders: BTreeMap<usize, ToolCallBuilder>,
    promoted_indexes: BTreeSet<usize>,
    completed: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
}

impl ContentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulated_text(&self) -> &str {
        &self.text
    }

    pub fn accumulated_reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Calls promoted so far this turn
    pub fn completed_tool_calls(&self) -> &[ToolCall] {
        &self.completed
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Drop everything accumulated for the current turn
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn absorb_tool_chunk(&mut self, chunk: &ToolCallChunk) {
        if self.promoted_indexes.contains(&chunk.index) {
            log::debug!("ignoring fragment for already completed tool call {}", chunk.index);
            return;
        }
        self.builders.entry(chunk.index).or_default().absorb(chunk);
    }

    /// Promote every pending builder; incomplete ones are dropped.
    fn promote(&mut self) -> Vec<ToolCall> {
        let mut promoted = Vec::new();
        for (index, builder) in std::mem::take(&mut self.builders) {
            self.promoted_indexes.insert(index);
            if !builder.is_complete() {
                log::warn!(
                    "dropping incomplete tool call {} (name: {:?}, arguments: {:?})",
                    index,
                    builder.name,
                    builder.arguments
                );
                continue;
            }
            promoted.extend(builder.build(index));
        }
        self.completed.extend(promoted.iter().cloned());
        promoted
    }
}

#[async_trait]
impl StreamProcessor for ContentAccumulator {
    fn name(&self) -> &'static str {
        "content_accumulator"
    }

    async fn process(&mut self, mut chunk: StreamChunk) -> Result<StreamChunk> {
        if chunk.metadata.retry.is_some_and(|r| r.supersedes_previous) {
            log::debug!("retried attempt supersedes earlier output; resetting accumulator");
            self.reset();
        }

        if let Some(content) = &chunk.content {
            self.text.push_str(content);
        }
        if let Some(reasoning) = &chunk.reasoning {
            self.reasoning.push_str(reasoning);
        }
        for tool_chunk in &chunk.tool_call_chunks {
            self.absorb_tool_chunk(tool_chunk);
        }

        self.finish_reason = FinishReason::advance(self.finish_reason, chunk.metadata.finish_reason);

        if chunk.is_complete {
            self.promote();
            chunk.tool_calls = self.completed.clone();
            let fallback = if self.completed.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            };
            let reason = match self.finish_reason {
                Some(r) if r.is_terminal() => r,
                _ => fallback,
            };
            self.finish_reason = Some(reason);
            chunk.metadata.finish_reason = Some(reason);
        } else {
            if chunk.metadata.finish_reason == Some(FinishReason::ToolCalls) {
                chunk.tool_calls = self.promote();
            }
            if chunk.metadata.finish_reason.is_some() {
                chunk.metadata.finish_reason = self.finish_reason;
            }
        }

        chunk.metadata.accumulated_content = Some(self.text.clone());
        Ok(chunk)
    }
}
