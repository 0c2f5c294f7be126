//! Usage accounting collaborators: token counting, pricing and the usage callback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{CostUsage, InputCost, OutputCost, Usage};

/// Counts tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> u64;
}

/// Rough estimate (actual tokenization varies): ~4 characters per token for English text.
#[derive(Debug, Default, Clone, Copy)]
pub struct EstimatingTokenCounter;

impl TokenCounter for EstimatingTokenCounter {
    fn count(&self, text: &str) -> u64 {
        (text.len() / 4) as u64
    }
}

/// Per-million-token prices for one model
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPricing {
    #[serde(rename = "input-per-million")]
    pub input_per_million: f64,
    #[serde(rename = "output-per-million")]
    pub output_per_million: f64,
    /// Price for cache reads; falls back to the input price
    #[serde(rename = "cached-input-per-million")]
    pub cached_input_per_million: Option<f64>,
}

impl ModelPricing {
    pub fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
            cached_input_per_million: None,
        }
    }

    /// Fill `usage.costs` from its token counts
    pub fn apply(&self, usage: &mut Usage) {
        let per = |tokens: u64, price: f64| tokens as f64 / 1_000_000.0 * price;
        let t = &usage.tokens;
        let cached_price = self.cached_input_per_million.unwrap_or(self.input_per_million);

        let uncached_input = t.input.total.saturating_sub(t.input.cached);
        let input_cached = per(t.input.cached, cached_price);
        let input_total = per(uncached_input, self.input_per_million) + input_cached;
        let output_reasoning = per(t.output.reasoning, self.output_per_million);
        let output_total = per(t.output.total, self.output_per_million);

        usage.costs = CostUsage {
            input: InputCost {
                total: input_total,
                cached: input_cached,
            },
            output: OutputCost {
                total: output_total,
                reasoning: output_reasoning,
            },
            total: input_total + output_total,
        };
    }
}

/// Incremental usage reported to a [`UsageCallback`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub caller_id: String,
    /// Usage since the previous event of the same turn
    pub usage: Usage,
    pub timestamp: DateTime<Utc>,
}

/// Receives batched usage events. Errors are logged by the caller and never abort a stream.
#[async_trait]
pub trait UsageCallback: Send + Sync {
    async fn on_usage(&self, event: UsageEvent) -> Result<()>;
}
