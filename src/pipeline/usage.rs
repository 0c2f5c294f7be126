//! Usage accounting over a turn's accumulated content.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::StreamProcessor;
use crate::error::Result;
use crate::types::{StreamChunk, Usage};
use crate::usage::{ModelPricing, TokenCounter, UsageCallback, UsageEvent};

/// Tracks cumulative usage and reports batched deltas to a callback.
///
/// The callback fires when at least `batch_size` new output tokens have accrued
/// since the previous report, and once more on the terminal chunk if anything is
/// left unreported. Provider-reported usage always wins over the local estimate.
pub struct UsageAccountant {
    caller_id: String,
    counter: Arc<dyn TokenCounter>,
    callback: Option<Arc<dyn UsageCallback>>,
    pricing: Option<ModelPricing>,
    input_tokens: u64,
    batch_size: u64,
    text: String,
    reasoning: String,
    cumulative: Usage,
    reported: Usage,
}

impl UsageAccountant {
    pub fn new(caller_id: impl Into<String>, counter: Arc<dyn TokenCounter>, input_tokens: u64) -> Self {
        Self {
            caller_id: caller_id.into(),
            counter,
            callback: None,
            pricing: None,
            input_tokens,
            batch_size: 100,
            text: String::new(),
            reasoning: String::new(),
            cumulative: Usage::default(),
            reported: Usage::default(),
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn UsageCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_pricing(mut self, pricing: Option<ModelPricing>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Cumulative usage of the turn so far
    pub fn cumulative(&self) -> &Usage {
        &self.cumulative
    }

    fn estimate(&self, chunk: &StreamChunk) -> Usage {
        let content = chunk
            .metadata
            .accumulated_content
            .as_deref()
            .unwrap_or(&self.text);
        let reasoning_tokens = self.counter.count(&self.reasoning);
        let output = self.counter.count(content) + reasoning_tokens;

        let mut usage = Usage::from_tokens(self.input_tokens, output);
        usage.tokens.output.reasoning = reasoning_tokens;
        usage
    }

    async fn report(&mut self) {
        let Some(callback) = self.callback.clone() else {
            return;
        };
        let event = UsageEvent {
            caller_id: self.caller_id.clone(),
            usage: self.cumulative.delta_since(&self.reported),
            timestamp: Utc::now(),
        };
        if let Err(e) = callback.on_usage(event).await {
            log::warn!("usage callback failed for {}: {}", self.caller_id, e);
        }
        self.reported = self.cumulative;
    }
}

#[async_trait]
impl StreamProcessor for UsageAccountant {
    fn name(&self) -> &'static str {
        "usage_accountant"
    }

    async fn process(&mut self, mut chunk: StreamChunk) -> Result<StreamChunk> {
        if chunk.metadata.retry.is_some_and(|r| r.supersedes_previous) {
            self.text.clear();
            self.reasoning.clear();
        }
        if let Some(content) = &chunk.content {
            self.text.push_str(content);
        }
        if let Some(reasoning) = &chunk.reasoning {
            self.reasoning.push_str(reasoning);
        }

        let mut usage = match chunk.metadata.usage {
            Some(provider_usage) => provider_usage,
            None => self.estimate(&chunk),
        };
        if let Some(pricing) = &self.pricing {
            pricing.apply(&mut usage);
        }
        self.cumulative = usage;

        let pending_output = self
            .cumulative
            .tokens
            .output
            .total
            .saturating_sub(self.reported.tokens.output.total);
        let has_unreported = self.cumulative != self.reported;
        if (chunk.is_complete && has_unreported) || pending_output >= self.batch_size {
            self.report().await;
        }

        if chunk.has_content() || chunk.is_complete || chunk.metadata.usage.is_some() {
            chunk.metadata.usage = Some(self.cumulative);
        }
        Ok(chunk)
    }
}
