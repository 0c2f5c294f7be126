//! Commits the assistant's turn to history on the terminal chunk.

use std::sync::Arc;

use async_trait::async_trait;

use super::StreamProcessor;
use crate::error::Result;
use crate::history::HistoryStore;
use crate::types::{Message, StreamChunk};

/// Appends exactly one assistant message per turn.
///
/// Plain text when the turn produced no tool calls; otherwise an assistant message
/// carrying the structured calls so the next request keeps the provider's tool protocol.
/// Reads `metadata.accumulated_content`, so it must run after `ContentAccumulator`.
pub struct HistoryCommitter {
    history: Arc<dyn HistoryStore>,
}

impl HistoryCommitter {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl StreamProcessor for HistoryCommitter {
    fn name(&self) -> &'static str {
        "history_committer"
    }

    async fn process(&mut self, chunk: StreamChunk) -> Result<StreamChunk> {
        if !chunk.is_complete {
            return Ok(chunk);
        }

        let text = chunk
            .metadata
            .accumulated_content
            .clone()
            .or_else(|| chunk.content.clone())
            .unwrap_or_default();

        let message = if chunk.tool_calls.is_empty() {
            Message::assistant(text)
        } else {
            log::debug!("committing assistant turn with {} tool calls", chunk.tool_calls.len());
            Message::assistant_tool_calls(text, chunk.tool_calls.clone())
        };
        self.history.add_message(message)?;

        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;
    use crate::pipeline::{ContentAccumulator, StreamPipeline};
    use crate::types::{FinishReason, Role, ToolCallChunk};
    use serde_json::json;

    #[tokio::test]
    async fn test_commits_plain_text_once() {
        let history = Arc::new(InMemoryHistory::new());
        let mut pipeline = StreamPipeline::new()
            .with(ContentAccumulator::new())
            .with(HistoryCommitter::new(history.clone()));

        pipeline.process_chunk(StreamChunk::text("Hello ")).await.unwrap();
        assert!(history.is_empty());
        pipeline
            .process_chunk(StreamChunk::text("world").complete())
            .await
            .unwrap();

        let messages = history.historical_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].content, "Hello world");
        assert!(messages[0].tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_commits_structured_tool_calls() {
        let history = Arc::new(InMemoryHistory::new());
        let mut pipeline = StreamPipeline::new()
            .with(ContentAccumulator::new())
            .with(HistoryCommitter::new(history.clone()));

        pipeline
            .process_chunk(StreamChunk::default().with_tool_call_chunk(
                ToolCallChunk::new(0)
                    .with_id("call_9")
                    .with_name("lookup")
                    .with_arguments("{\"id\":1}"),
            ))
            .await
            .unwrap();
        pipeline
            .process_chunk(StreamChunk::done(FinishReason::ToolCalls))
            .await
            .unwrap();

        let messages = history.historical_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].tool_calls.len(), 1);
        assert_eq!(messages[0].tool_calls[0].id, "call_9");
        assert_eq!(messages[0].tool_calls[0].arguments, json!({"id": 1}));
    }
}
