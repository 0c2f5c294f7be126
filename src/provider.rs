//! Provider stream source abstraction
//!
//! A provider adapter owns the network transport and wire format; this crate only
//! needs it to hand back a stream of universal chunks for one attempt.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::Stream;

use crate::error::{Result, UnillmError};
use crate::types::{StreamChunk, StreamParams};

/// A stream of universal chunks for one attempt or one logical call.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Source of provider chunk streams.
///
/// Errors returned before the stream exists are transport or request failures;
/// errors yielded inside the stream are mid-stream failures.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    async fn stream_call(&self, model: &str, params: &StreamParams) -> Result<ChunkStream>;
}

/// One scripted reply of a [`MockProvider`]
pub enum MockReply {
    /// `stream_call` itself fails
    Fail(UnillmError),
    /// `stream_call` succeeds and yields these items in order
    Stream(Vec<Result<StreamChunk>>),
}

/// Scripted provider for tests and fixture replay.
///
/// Each `stream_call` pops the next reply and records the params it was called with.
#[derive(Default)]
pub struct MockProvider {
    replies: Mutex<VecDeque<MockReply>>,
    calls: Mutex<Vec<StreamParams>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful stream of chunks
    pub fn push_chunks(&self, chunks: Vec<StreamChunk>) -> &Self {
        self.push(MockReply::Stream(chunks.into_iter().map(Ok).collect()))
    }

    /// Queue a failure of `stream_call`
    pub fn push_error(&self, error: UnillmError) -> &Self {
        self.push(MockReply::Fail(error))
    }

    pub fn push(&self, reply: MockReply) -> &Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
        self
    }

    /// Number of `stream_call` invocations so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Params of every `stream_call` invocation, in order
    pub fn calls(&self) -> Vec<StreamParams> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl StreamProvider for MockProvider {
    async fn stream_call(&self, model: &str, params: &StreamParams) -> Result<ChunkStream> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(params.clone());

        let reply = self.replies.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match reply {
            Some(MockReply::Fail(e)) => Err(e),
            Some(MockReply::Stream(items)) => {
                log::debug!("mock provider streaming {} items for {}", items.len(), model);
                Ok(Box::pin(futures::stream::iter(items)))
            }
            None => Err(UnillmError::Transport("mock provider has no scripted reply".to_string())),
        }
    }
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("call_count", &self.call_count())
            .finish()
    }
}
