//! unillm - a universal streaming core for LLM clients
//!
//! Turns one unreliable, incrementally-delivered provider stream into a retry-safe,
//! tool-aware sequence of universal [`StreamChunk`]s. Provider transport, tool logic,
//! history storage and pricing stay outside, behind traits.

pub mod acquisition;
pub mod config;
pub mod controller;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod provider;
pub mod quality;
pub mod retry;
pub mod schema;
pub mod tools;
pub mod types;
pub mod usage;

pub use acquisition::StreamAcquisition;
pub use config::StreamConfig;
pub use controller::{CollectedResponse, StreamController, collect_response};
pub use error::{Result, UnillmError};
pub use history::{HistoryStore, InMemoryHistory};
pub use provider::{ChunkStream, MockProvider, StreamProvider};
pub use retry::RetryPolicy;
pub use tools::{Tool, ToolExecutor, ToolOrchestrator, ToolOutcome, ToolRegistry};
pub use types::{FinishReason, Message, Role, StreamChunk, StreamParams, ToolCall, ToolCallChunk};
