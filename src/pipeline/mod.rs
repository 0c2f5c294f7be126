//! Stream pipeline - ordered, composable chunk transforms.
//!
//! Every chunk of a turn flows through each processor in order. Processors are
//! pass-through by default and communicate through the chunk itself (metadata,
//! completed tool calls), never through shared state.

mod accumulator;
mod finalizer;
mod history;
mod usage;

pub use accumulator::{ContentAccumulator, ToolCallBuilder};
pub use finalizer::ResponseFinalizer;
pub use history::HistoryCommitter;
pub use usage::UsageAccountant;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::Result;
use crate::provider::ChunkStream;
use crate::types::StreamChunk;

/// A single chunk transform
#[async_trait]
pub trait StreamProcessor: Send {
    /// Processor name for logs
    fn name(&self) -> &'static str;

    /// Transform one chunk
    async fn process(&mut self, chunk: StreamChunk) -> Result<StreamChunk>;
}

/// Ordered composition of processors
#[derive(Default)]
pub struct StreamPipeline {
    processors: Vec<Box<dyn StreamProcessor>>,
}

impl StreamPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a processor (builder style)
    pub fn with(mut self, processor: impl StreamProcessor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Append a boxed processor
    pub fn add(&mut self, processor: Box<dyn StreamProcessor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Processor names in execution order
    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Run one chunk through every processor
    pub async fn process_chunk(&mut self, mut chunk: StreamChunk) -> Result<StreamChunk> {
        for processor in self.processors.iter_mut() {
            chunk = processor.process(chunk).await?;
        }
        Ok(chunk)
    }

    /// Apply the pipeline to a whole stream. The first error ends the stream.
    pub fn process_stream(mut self, mut input: ChunkStream) -> ChunkStream {
        Box::pin(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(chunk) => match self.process_chunk(chunk).await {
                        Ok(chunk) => yield Ok(chunk),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    },
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for StreamPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPipeline")
            .field("processors", &self.names())
            .finish()
    }
}
