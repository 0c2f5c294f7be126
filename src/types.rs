//! Universal stream and conversation types
//!
//! Provider adapters translate their wire events into these types; everything
//! downstream of the provider only ever sees `StreamChunk`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationIssue;

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            error: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message carrying structured tool calls
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Create a tool result message answering `tool_call_id`
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// Create a tool message reporting a failed call
    pub fn tool_error(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            tool_call_id: Some(tool_call_id.into()),
            error: Some(error.clone()),
            ..Self::new(Role::Tool, format!("Error: {}", error))
        }
    }
}

/// Tool definition advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A fully reassembled tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-issued id; must round-trip unchanged
    pub id: String,
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            result: None,
            error: None,
        }
    }
}

/// One fragment of a tool call as delivered by the provider.
///
/// Fragments sharing `index` belong to one call and are concatenated in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments_chunk: Option<String>,
}

impl ToolCallChunk {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_arguments(mut self, fragment: impl Into<String>) -> Self {
        self.arguments_chunk = Some(fragment.into());
        self
    }
}

/// Reason why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    /// Interim: the provider has not decided yet
    Null,
}

impl FinishReason {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FinishReason::Null)
    }

    /// Merge an incoming reason into the current one.
    ///
    /// An interim reason never replaces a terminal one.
    pub fn advance(current: Option<FinishReason>, incoming: Option<FinishReason>) -> Option<FinishReason> {
        match (current, incoming) {
            (current, None) => current,
            (Some(cur), Some(next)) if cur.is_terminal() && !next.is_terminal() => Some(cur),
            (_, next) => next,
        }
    }

    /// Parse a provider-specific reason string.
    pub fn parse(reason: &str) -> FinishReason {
        match reason {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" | "safety" => FinishReason::ContentFilter,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
            _ => FinishReason::Null,
        }
    }
}

/// Input token counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTokens {
    pub total: u64,
    pub cached: u64,
}

/// Output token counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTokens {
    pub total: u64,
    pub reasoning: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: InputTokens,
    pub output: OutputTokens,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputCost {
    pub total: f64,
    pub cached: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputCost {
    pub total: f64,
    pub reasoning: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostUsage {
    pub input: InputCost,
    pub output: OutputCost,
    pub total: f64,
}

/// Token and cost usage; used both for per-callback deltas and per-turn totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub tokens: TokenUsage,
    pub costs: CostUsage,
}

impl Usage {
    /// Create usage from plain input/output token counts
    pub fn from_tokens(input: u64, output: u64) -> Self {
        Self {
            tokens: TokenUsage {
                input: InputTokens { total: input, cached: 0 },
                output: OutputTokens {
                    total: output,
                    reasoning: 0,
                },
                total: input + output,
            },
            costs: CostUsage::default(),
        }
    }

    /// Add another usage into this one
    pub fn add(&mut self, other: &Usage) {
        let (t, o) = (&mut self.tokens, &other.tokens);
        t.input.total += o.input.total;
        t.input.cached += o.input.cached;
        t.output.total += o.output.total;
        t.output.reasoning += o.output.reasoning;
        t.total += o.total;

        let (c, oc) = (&mut self.costs, &other.costs);
        c.input.total += oc.input.total;
        c.input.cached += oc.input.cached;
        c.output.total += oc.output.total;
        c.output.reasoning += oc.output.reasoning;
        c.total += oc.total;
    }

    /// Token-wise and cost-wise difference `self - earlier`, saturating at zero.
    pub fn delta_since(&self, earlier: &Usage) -> Usage {
        let t = &self.tokens;
        let e = &earlier.tokens;
        let c = &self.costs;
        let ec = &earlier.costs;
        Usage {
            tokens: TokenUsage {
                input: InputTokens {
                    total: t.input.total.saturating_sub(e.input.total),
                    cached: t.input.cached.saturating_sub(e.input.cached),
                },
                output: OutputTokens {
                    total: t.output.total.saturating_sub(e.output.total),
                    reasoning: t.output.reasoning.saturating_sub(e.output.reasoning),
                },
                total: t.total.saturating_sub(e.total),
            },
            costs: CostUsage {
                input: InputCost {
                    total: (c.input.total - ec.input.total).max(0.0),
                    cached: (c.input.cached - ec.input.cached).max(0.0),
                },
                output: OutputCost {
                    total: (c.output.total - ec.output.total).max(0.0),
                    reasoning: (c.output.reasoning - ec.output.reasoning).max(0.0),
                },
                total: (c.total - ec.total).max(0.0),
            },
        }
    }
}

/// Marks chunks produced by a retried attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryInfo {
    pub attempt: u32,
    /// Output already delivered from earlier attempts of this turn is stale
    pub supersedes_previous: bool,
}

/// Position of a chunk within the provider stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub current_chunk: usize,
    pub total_chunks: usize,
}

/// Per-chunk metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accumulated_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<ValidationIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_info: Option<ProcessInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryInfo>,
    /// Failure that ended the session after output was already delivered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One universal response fragment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_chunks: Vec<ToolCallChunk>,
    /// Completed calls, populated on the chunk that finishes a turn's tool calls
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Parsed structured output, when JSON output was requested and valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_object: Option<Value>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl StreamChunk {
    /// A content-bearing, non-terminal chunk
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A terminal chunk with the given finish reason
    pub fn done(finish_reason: FinishReason) -> Self {
        Self {
            is_complete: true,
            metadata: ChunkMetadata {
                finish_reason: Some(finish_reason),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_tool_call_chunk(mut self, chunk: ToolCallChunk) -> Self {
        self.tool_call_chunks.push(chunk);
        self
    }

    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.metadata.finish_reason = Some(reason);
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.metadata.usage = Some(usage);
        self
    }

    pub fn complete(mut self) -> Self {
        self.is_complete = true;
        self
    }

    /// True if the chunk carries visible text
    pub fn has_content(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.metadata.finish_reason
    }
}

/// Structured output request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<Value>,
    },
}

impl ResponseFormat {
    pub fn is_json(&self) -> bool {
        matches!(self, ResponseFormat::Json { .. })
    }
}

/// Sampling settings forwarded to the provider untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Everything a provider needs for one streaming call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamParams {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub response_format: ResponseFormat,
    #[serde(default)]
    pub settings: ModelSettings,
}

impl StreamParams {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Add tools to the request
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Request JSON output, optionally validated against `schema`
    pub fn with_json_output(mut self, schema: Option<Value>) -> Self {
        self.response_format = ResponseFormat::Json { schema };
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.settings.max_tokens = Some(max_tokens);
        self
    }
}
