//! Stream configuration.
//!
//! Loaded from ~/.config/unillm/unillm.yml or .unillm.yml

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::{DEFAULT_MAX_RETRIES, RetryPolicy};
use crate::tools::DEFAULT_MAX_ITERATIONS;
use crate::usage::ModelPricing;

/// Default model identifier handed to the provider.
pub const DEFAULT_MODEL: &str = "default";

/// Configuration for a [`StreamController`](crate::StreamController).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Model identifier handed to the provider.
    pub model: String,

    /// Retry settings.
    pub retry: RetryConfig,

    /// Tool orchestration settings.
    pub tools: ToolsConfig,

    /// Usage accounting settings.
    pub usage: UsageConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            retry: RetryConfig::default(),
            tools: ToolsConfig::default(),
            usage: UsageConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .unillm.yml in current directory
    /// 3. ~/.config/unillm/unillm.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".unillm.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .unillm.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .unillm.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("unillm").join("unillm.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            eyre::bail!("model must not be empty");
        }
        if self.tools.max_iterations == 0 {
            eyre::bail!("tools.max-iterations must be > 0");
        }
        if self.usage.token_batch_size == 0 {
            eyre::bail!("usage.token-batch-size must be > 0");
        }
        Ok(())
    }

    /// Retry policy described by `retry`
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_retries, Duration::from_millis(self.retry.base_delay_ms))
    }

    /// Pricing for the configured model, if any
    pub fn model_pricing(&self) -> Option<ModelPricing> {
        self.usage.pricing.get(&self.model).copied()
    }
}

/// Retry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Backoff base in milliseconds.
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Retry completed responses that fail the content-quality check.
    #[serde(rename = "content-retry")]
    pub content_retry: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: 1000,
            content_retry: true,
        }
    }
}

/// Tool orchestration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Executed tool batches allowed per session.
    #[serde(rename = "max-iterations")]
    pub max_iterations: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Usage accounting settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Output tokens between usage callbacks.
    #[serde(rename = "token-batch-size")]
    pub token_batch_size: u64,

    /// Caller id reported with every usage event.
    #[serde(rename = "caller-id")]
    pub caller_id: String,

    /// Per-model pricing.
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            token_batch_size: 100,
            caller_id: "unillm".to_string(),
            pricing: HashMap::new(),
        }
    }
}
