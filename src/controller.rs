//! Stream controller - the session entry point.
//!
//! One `create_stream` call is one session: the initial turn plus every tool
//! continuation, delivered to the caller as a single stream of chunks.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;

use crate::acquisition::StreamAcquisition;
use crate::config::StreamConfig;
use crate::error::{Result, UnillmError, ValidationIssue};
use crate::history::HistoryStore;
use crate::pipeline::{ContentAccumulator, HistoryCommitter, ResponseFinalizer, StreamPipeline, UsageAccountant};
use crate::provider::{ChunkStream, StreamProvider};
use crate::schema::{BasicSchemaValidator, SchemaValidator};
use crate::tools::{ToolExecutor, ToolOrchestrator};
use crate::types::{FinishReason, ResponseFormat, StreamChunk, StreamParams, ToolCall, Usage};
use crate::usage::{EstimatingTokenCounter, ModelPricing, TokenCounter, UsageCallback};

/// Composes acquisition, pipeline and tool orchestration behind `create_stream`
#[derive(Clone)]
pub struct StreamController {
    provider: Arc<dyn StreamProvider>,
    history: Arc<dyn HistoryStore>,
    executor: Arc<dyn ToolExecutor>,
    config: StreamConfig,
    usage_callback: Option<Arc<dyn UsageCallback>>,
    validator: Arc<dyn SchemaValidator>,
    counter: Arc<dyn TokenCounter>,
    pricing: Option<ModelPricing>,
    caller_id: String,
}

impl StreamController {
    pub fn new(
        provider: Arc<dyn StreamProvider>,
        history: Arc<dyn HistoryStore>,
        executor: Arc<dyn ToolExecutor>,
        config: StreamConfig,
    ) -> Self {
        Self {
            provider,
            history,
            executor,
            usage_callback: None,
            validator: Arc::new(BasicSchemaValidator),
            counter: Arc::new(EstimatingTokenCounter),
            pricing: config.model_pricing(),
            caller_id: config.usage.caller_id.clone(),
            config,
        }
    }

    pub fn with_usage_callback(mut self, callback: Arc<dyn UsageCallback>) -> Self {
        self.usage_callback = Some(callback);
        self
    }

    pub fn with_schema_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = Some(pricing);
        self
    }

    pub fn with_caller_id(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = caller_id.into();
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Start a session.
    ///
    /// `params.messages` are appended to history first; every turn then sends the full
    /// history. A terminal chunk carrying tool calls is delivered before the tools run,
    /// and the continuation's chunks follow it. A failure of the first turn is yielded
    /// as an `Err`; a failed continuation yields one synthetic terminal chunk with
    /// `metadata.error` set instead.
    pub fn create_stream(&self, params: StreamParams) -> ChunkStream {
        let this = self.clone();

        Box::pin(async_stream::stream! {
            let orchestrator = ToolOrchestrator::new(this.executor.clone(), this.history.clone())
                .with_max_iterations(this.config.tools.max_iterations);
            let mut session = orchestrator.new_session();
            let acquisition = StreamAcquisition::new(this.config.policy());

            for message in &params.messages {
                if let Err(e) = this.history.add_message(message.clone()) {
                    yield Err(e);
                    return;
                }
            }

            let mut turn: usize = 0;
            loop {
                let turn_params = StreamParams {
                    messages: this.history.historical_messages(),
                    ..params.clone()
                };
                tracing::debug!(turn, messages = turn_params.messages.len(), model = %this.config.model, "starting turn");
                let pipeline = this.build_pipeline(&turn_params);

                let provider = this.provider.clone();
                let model = this.config.model.clone();
                let factory = move || {
                    let provider = provider.clone();
                    let model = model.clone();
                    let params = turn_params.clone();
                    async move { provider.stream_call(&model, &params).await }
                };

                let mut chunks = pipeline.process_stream(acquisition.acquire(factory, this.config.retry.content_retry));
                let mut tool_calls: Vec<ToolCall> = Vec::new();

                while let Some(item) = chunks.next().await {
                    match item {
                        Ok(chunk) => {
                            if chunk.is_complete {
                                tool_calls = chunk.tool_calls.clone();
                            }
                            yield Ok(chunk);
                        }
                        Err(e) if turn == 0 => {
                            yield Err(e);
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(turn, error = %e, "continuation failed");
                            yield Ok(continuation_failure(e));
                            return;
                        }
                    }
                }

                if tool_calls.is_empty() {
                    return;
                }

                match orchestrator.process_tool_calls(&mut session, &tool_calls).await {
                    Ok(outcome) if outcome.requires_resubmission => {
                        tracing::info!(
                            turn,
                            executed = outcome.new_tool_calls.len(),
                            skipped = outcome.skipped.len(),
                            "resubmitting with tool results"
                        );
                        turn += 1;
                    }
                    Ok(_) => return,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        })
    }

    fn build_pipeline(&self, params: &StreamParams) -> StreamPipeline {
        let input_tokens = params.messages.iter().map(|m| self.counter.count(&m.content)).sum();

        let mut usage = UsageAccountant::new(self.caller_id.clone(), self.counter.clone(), input_tokens)
            .with_batch_size(self.config.usage.token_batch_size)
            .with_pricing(self.pricing);
        if let Some(callback) = &self.usage_callback {
            usage = usage.with_callback(callback.clone());
        }

        let mut pipeline = StreamPipeline::new().with(ContentAccumulator::new()).with(usage);
        if let ResponseFormat::Json { schema } = &params.response_format {
            pipeline = pipeline.with(ResponseFinalizer::new(schema.clone(), self.validator.clone()));
        }
        pipeline.with(HistoryCommitter::new(self.history.clone()))
    }
}

impl std::fmt::Debug for StreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("model", &self.config.model)
            .field("caller_id", &self.caller_id)
            .finish()
    }
}

fn continuation_failure(error: UnillmError) -> StreamChunk {
    let message = UnillmError::ContinuationAcquisition(error.to_string()).to_string();
    let mut chunk = StreamChunk::done(FinishReason::Stop);
    chunk.metadata.error = Some(message);
    chunk
}

/// Everything a session delivered, folded into one value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedResponse {
    /// Visible text of every turn, superseded attempts removed
    pub content: String,
    pub reasoning: String,
    /// Tool calls of every turn, in order
    pub tool_calls: Vec<ToolCall>,
    /// Finish reason of the last turn
    pub finish_reason: Option<FinishReason>,
    /// Sum of every turn's usage
    pub usage: Usage,
    pub content_object: Option<Value>,
    pub validation_errors: Vec<ValidationIssue>,
    /// Set when a continuation failed
    pub error: Option<String>,
    /// Number of terminal chunks seen
    pub turns: usize,
}

/// Drain a stream into a [`CollectedResponse`]. The first `Err` item is returned.
pub async fn collect_response(mut stream: ChunkStream) -> Result<CollectedResponse> {
    let mut response = CollectedResponse::default();
    let mut turn_start = 0;
    let mut reasoning_start = 0;

    while let Some(item) = stream.next().await {
        let chunk = item?;

        if chunk.metadata.retry.is_some_and(|r| r.supersedes_previous) {
            response.content.truncate(turn_start);
            response.reasoning.truncate(reasoning_start);
        }
        if let Some(content) = &chunk.content {
            response.content.push_str(content);
        }
        if let Some(reasoning) = &chunk.reasoning {
            response.reasoning.push_str(reasoning);
        }

        if chunk.is_complete {
            response.turns += 1;
            response.finish_reason = chunk.finish_reason();
            response.tool_calls.extend(chunk.tool_calls);
            if let Some(usage) = &chunk.metadata.usage {
                response.usage.add(usage);
            }
            if chunk.content_object.is_some() {
                response.content_object = chunk.content_object;
            }
            if !chunk.metadata.validation_errors.is_empty() {
                response.validation_errors = chunk.metadata.validation_errors;
            }
            if chunk.metadata.error.is_some() {
                response.error = chunk.metadata.error;
            }
            turn_start = response.content.len();
            reasoning_start = response.reasoning.len();
        }
    }

    Ok(response)
}
