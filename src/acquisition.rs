//! Stream acquisition - one logical stream out of several provider attempts.
//!
//! Each attempt asks a factory for a fresh provider stream. Transport failures and
//! unsatisfactory completed responses share one retry budget; validation-shaped
//! failures are propagated unchanged on the first occurrence.

use std::future::Future;

use futures::StreamExt;

use crate::error::{Result, UnillmError};
use crate::provider::ChunkStream;
use crate::quality;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::types::{FinishReason, RetryInfo, StreamChunk};

/// Retry wrapper around a provider stream factory
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamAcquisition {
    policy: RetryPolicy,
}

impl StreamAcquisition {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Produce one logical stream from repeated calls to `factory`.
    ///
    /// Non-terminal chunks are forwarded as they arrive. The terminal chunk is held
    /// until the content-quality check (when `content_retry` is set) passes, so a
    /// failed attempt never delivers a terminal chunk. The first chunk of a retried
    /// attempt carries `metadata.retry` with `supersedes_previous = true`.
    ///
    /// Terminal failures are yielded as the final `Err` item.
    pub fn acquire<F, Fut>(&self, mut factory: F, content_retry: bool) -> ChunkStream
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ChunkStream>> + Send + 'static,
    {
        let policy = self.policy;

        Box::pin(async_stream::stream! {
            let mut attempt: u32 = 0;

            loop {
                let failure = match factory().await {
                    Err(e) => e,
                    Ok(mut upstream) => {
                        let mut text = String::new();
                        let mut saw_tool_calls = false;
                        let mut first = true;
                        let mut terminal: Option<StreamChunk> = None;
                        let mut mid_stream: Option<UnillmError> = None;

                        while let Some(item) = upstream.next().await {
                            let mut chunk = match item {
                                Ok(chunk) => chunk,
                                Err(e) => {
                                    mid_stream = Some(e);
                                    break;
                                }
                            };
                            if first && attempt > 0 {
                                chunk.metadata.retry = Some(RetryInfo {
                                    attempt,
                                    supersedes_previous: true,
                                });
                            }
                            first = false;

                            if let Some(content) = &chunk.content {
                                text.push_str(content);
                            }
                            if !chunk.tool_call_chunks.is_empty()
                                || chunk.finish_reason() == Some(FinishReason::ToolCalls)
                            {
                                saw_tool_calls = true;
                            }

                            if chunk.is_complete {
                                terminal = Some(chunk);
                                break;
                            }
                            yield Ok(chunk);
                        }

                        match mid_stream {
                            Some(e) => e,
                            None => {
                                let chunk = match terminal {
                                    Some(chunk) => chunk,
                                    None => {
                                        log::warn!("provider stream ended without a terminal chunk (attempt {})", attempt);
                                        let mut done = StreamChunk::done(FinishReason::Stop);
                                        if first && attempt > 0 {
                                            done.metadata.retry = Some(RetryInfo {
                                                attempt,
                                                supersedes_previous: true,
                                            });
                                        }
                                        done
                                    }
                                };

                                if content_retry && !saw_tool_calls && quality::is_unsatisfactory(&text) {
                                    UnillmError::ContentQuality(format!(
                                        "unsatisfactory response ({} chars)",
                                        text.chars().count()
                                    ))
                                } else {
                                    yield Ok(chunk);
                                    return;
                                }
                            }
                        }
                    }
                };

                match policy.classify(attempt, &failure) {
                    RetryDecision::Abort => {
                        log::debug!("not retrying validation failure: {}", failure);
                        yield Err(failure);
                        return;
                    }
                    RetryDecision::Exhausted => {
                        log::warn!("giving up after {} attempts: {}", attempt + 1, failure);
                        yield Err(UnillmError::RetriesExhausted {
                            attempts: attempt + 1,
                            source: Box::new(failure),
                        });
                        return;
                    }
                    RetryDecision::Retry { delay } => {
                        log::warn!(
                            "attempt {}/{} failed: {}; retrying in {:?}",
                            attempt + 1,
                            policy.max_attempts(),
                            failure,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        })
    }
}
