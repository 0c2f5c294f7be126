//! Fixture replay - drives the controller from a scripted YAML conversation.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use colored::*;
use eyre::{Context, Result};
use futures::StreamExt;
use serde::Deserialize;

use unillm::config::StreamConfig;
use unillm::tools::StaticTool;
use unillm::types::{Message, ResponseFormat, StreamChunk, StreamParams};
use unillm::usage::{UsageCallback, UsageEvent};
use unillm::{HistoryStore, InMemoryHistory, MockProvider, StreamController, ToolRegistry, UnillmError};

/// A scripted conversation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    /// Messages of the opening request
    pub messages: Vec<Message>,

    /// Tool name to the fixed result it returns
    pub tools: BTreeMap<String, String>,

    #[serde(rename = "response-format")]
    pub response_format: ResponseFormat,

    /// One entry per provider call, in order
    pub replies: Vec<FixtureReply>,
}

/// One scripted provider call: either a chunk stream or a transport failure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FixtureReply {
    pub chunks: Vec<StreamChunk>,
    pub error: Option<String>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context(format!("Failed to read fixture {}", path.display()))?;
        let fixture: Self = serde_yaml::from_str(&content).context("Failed to parse fixture")?;
        Ok(fixture)
    }

    /// Provider scripted with every reply
    pub fn provider(&self) -> MockProvider {
        let provider = MockProvider::new();
        for reply in &self.replies {
            match &reply.error {
                Some(error) => provider.push_error(UnillmError::Transport(error.clone())),
                None => provider.push_chunks(reply.chunks.clone()),
            };
        }
        provider
    }

    /// Registry of static tools
    pub fn registry(&self) -> ToolRegistry {
        self.tools
            .iter()
            .fold(ToolRegistry::new(), |registry, (name, result)| {
                registry.with_tool(StaticTool::new(name.clone(), result.clone()))
            })
    }
}

/// Logs usage events
struct LogUsage;

#[async_trait]
impl UsageCallback for LogUsage {
    async fn on_usage(&self, event: UsageEvent) -> unillm::Result<()> {
        log::info!(
            "usage for {}: +{} input, +{} output tokens (${:.6})",
            event.caller_id,
            event.usage.tokens.input.total,
            event.usage.tokens.output.total,
            event.usage.costs.total
        );
        Ok(())
    }
}

/// Stream `fixture` through a controller, printing chunks as they arrive.
///
/// Returns the conversation history at the end of the session.
pub async fn run(fixture: &Fixture, config: &StreamConfig, verbose: bool) -> Result<Vec<Message>> {
    let history = Arc::new(InMemoryHistory::new());
    let registry = fixture.registry();
    let params = StreamParams {
        messages: fixture.messages.clone(),
        tools: registry.definitions(),
        response_format: fixture.response_format.clone(),
        ..Default::default()
    };

    let controller = StreamController::new(
        Arc::new(fixture.provider()),
        history.clone(),
        Arc::new(registry),
        config.clone(),
    )
    .with_usage_callback(Arc::new(LogUsage));

    let mut stream = controller.create_stream(params);
    let mut stdout = std::io::stdout();

    while let Some(item) = stream.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                println!();
                println!("{} {}", "error:".red().bold(), e);
                return Err(e).context("Session failed");
            }
        };
        print_chunk(&mut stdout, &chunk, verbose)?;
    }

    Ok(history.historical_messages())
}

fn print_chunk(out: &mut impl Write, chunk: &StreamChunk, verbose: bool) -> Result<()> {
    if let Some(retry) = chunk.metadata.retry.filter(|r| r.supersedes_previous) {
        writeln!(out)?;
        writeln!(out, "{}", format!("[retry attempt {}]", retry.attempt).yellow())?;
    }
    if let Some(reasoning) = &chunk.reasoning
        && verbose
    {
        write!(out, "{}", reasoning.dimmed())?;
    }
    if let Some(content) = &chunk.content {
        write!(out, "{}", content)?;
    }
    out.flush()?;

    if !chunk.is_complete {
        return Ok(());
    }

    writeln!(out)?;
    for call in &chunk.tool_calls {
        writeln!(out, "{} {}({}) [{}]", "tool:".cyan().bold(), call.name, call.arguments, call.id)?;
    }
    for issue in &chunk.metadata.validation_errors {
        writeln!(out, "{} {}: {}", "invalid:".red(), issue.path, issue.message)?;
    }
    if let Some(object) = &chunk.content_object {
        writeln!(out, "{} {}", "object:".green(), object)?;
    }
    if let Some(error) = &chunk.metadata.error {
        writeln!(out, "{} {}", "error:".red().bold(), error)?;
    }

    let reason = chunk
        .finish_reason()
        .map(|r| format!("{:?}", r))
        .unwrap_or_else(|| "unknown".to_string());
    match &chunk.metadata.usage {
        Some(usage) if verbose => writeln!(
            out,
            "{}",
            format!("[finish: {}, tokens: {}]", reason, usage.tokens.total).dimmed()
        )?,
        _ => writeln!(out, "{}", format!("[finish: {}]", reason).dimmed())?,
    }
    Ok(())
}
