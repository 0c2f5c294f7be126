//! End-to-end session tests
//!
//! Drive `StreamController` with a scripted `MockProvider` and check what the caller
//! sees, what lands in history, and what the provider is asked for.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use unillm::provider::{ChunkStream, MockReply, StreamProvider};
use unillm::tools::StaticTool;
use unillm::types::{FinishReason, Message, Role, StreamChunk, StreamParams, ToolCallChunk};
use unillm::usage::{UsageCallback, UsageEvent};
use unillm::{
    HistoryStore, InMemoryHistory, MockProvider, Result, StreamConfig, StreamController, ToolExecutor, ToolOutcome, ToolRegistry,
    UnillmError, collect_response,
};

fn fast_config() -> StreamConfig {
    let mut config = StreamConfig::default();
    config.retry.base_delay_ms = 1;
    config
}

fn tool_call(index: usize, id: &str, name: &str, arguments: &str) -> StreamChunk {
    StreamChunk::default().with_tool_call_chunk(
        ToolCallChunk::new(index)
            .with_id(id)
            .with_name(name)
            .with_arguments(arguments),
    )
}

fn controller(provider: &Arc<MockProvider>, history: &Arc<InMemoryHistory>, executor: Arc<dyn ToolExecutor>) -> StreamController {
    StreamController::new(provider.clone(), history.clone(), executor, fast_config())
}

fn lookup_registry() -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::new().with_tool(StaticTool::new("lookup", "42")))
}

#[derive(Default)]
struct CountingExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl ToolExecutor for CountingExecutor {
    async fn execute(&self, _name: &str, arguments: &Value) -> Result<ToolOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutcome::success(format!("result for {}", arguments)))
    }
}

#[tokio::test]
async fn test_plain_text_turn_commits_one_assistant_message() {
    let provider = Arc::new(MockProvider::new());
    provider.push_chunks(vec![StreamChunk::text("Hello "), StreamChunk::text("world").complete()]);
    let history = Arc::new(InMemoryHistory::new());

    let stream = controller(&provider, &history, lookup_registry())
        .create_stream(StreamParams::new(vec![Message::user("Say hello")]));
    let response = collect_response(stream).await.unwrap();

    assert_eq!(response.content, "Hello world");
    assert_eq!(response.turns, 1);
    assert!(response.tool_calls.is_empty());
    assert_eq!(provider.call_count(), 1);

    let messages = history.historical_messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hello world");
    assert!(history.messages_with_role(Role::Tool).is_empty());
}

#[tokio::test]
async fn test_tool_result_committed_and_continuation_requested() {
    let provider = Arc::new(MockProvider::new());
    provider
        .push_chunks(vec![
            tool_call(0, "call_42", "lookup", "{\"id\":1}"),
            StreamChunk::done(FinishReason::ToolCalls),
        ])
        .push_chunks(vec![StreamChunk::text("Record 1 is 42.").complete()]);
    let history = Arc::new(InMemoryHistory::new());

    let stream = controller(&provider, &history, lookup_registry())
        .create_stream(StreamParams::new(vec![Message::user("What is record 1?")]));
    let items: Vec<_> = stream.collect().await;

    // Terminal chunk of the tool turn, then the continuation
    assert_eq!(items.len(), 3);
    let tool_terminal = items[1].as_ref().unwrap();
    assert!(tool_terminal.is_complete);
    assert_eq!(tool_terminal.finish_reason(), Some(FinishReason::ToolCalls));
    assert_eq!(tool_terminal.tool_calls[0].arguments, json!({"id": 1}));
    assert_eq!(items[2].as_ref().unwrap().content.as_deref(), Some("Record 1 is 42."));

    let tool_messages = history.messages_with_role(Role::Tool);
    assert_eq!(tool_messages.len(), 1);
    assert_eq!(tool_messages[0].content, "42");
    assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("call_42"));

    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    let continuation = &calls[1].messages;
    assert_eq!(continuation.len(), 3);
    assert_eq!(continuation[1].tool_calls[0].id, "call_42");
    assert_eq!(continuation[2].role, Role::Tool);
    assert_eq!(continuation[2].tool_call_id.as_deref(), Some("call_42"));

    let last = history.historical_messages().pop().unwrap();
    assert_eq!(last.content, "Record 1 is 42.");
}

#[tokio::test]
async fn test_split_arguments_reassembled() {
    let provider = Arc::new(MockProvider::new());
    provider
        .push_chunks(vec![
            tool_call(0, "call_w", "weather", "{\"loc"),
            StreamChunk::default().with_tool_call_chunk(ToolCallChunk::new(0).with_arguments("ation\":\"NYC\"")),
            StreamChunk::default().with_tool_call_chunk(ToolCallChunk::new(0).with_arguments("}")),
            StreamChunk::done(FinishReason::ToolCalls),
        ])
        .push_chunks(vec![StreamChunk::text("Sunny in NYC.").complete()]);
    let history = Arc::new(InMemoryHistory::new());
    let executor = Arc::new(CountingExecutor::default());

    let stream = controller(&provider, &history, executor.clone())
        .create_stream(StreamParams::new(vec![Message::user("Weather?")]));
    let response = collect_response(stream).await.unwrap();

    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].name, "weather");
    assert_eq!(response.tool_calls[0].arguments, json!({"location": "NYC"}));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(response.content, "Sunny in NYC.");
}

#[tokio::test]
async fn test_duplicate_call_in_session_stops_resubmission() {
    let provider = Arc::new(MockProvider::new());
    provider
        .push_chunks(vec![
            tool_call(0, "c1", "search", "{\"q\":\"rust\",\"n\":1}"),
            StreamChunk::done(FinishReason::ToolCalls),
        ])
        .push_chunks(vec![
            tool_call(0, "c2", "search", "{\"n\":1,\"q\":\"rust\"}"),
            StreamChunk::done(FinishReason::ToolCalls),
        ]);
    let history = Arc::new(InMemoryHistory::new());
    let executor = Arc::new(CountingExecutor::default());

    let stream = controller(&provider, &history, executor.clone())
        .create_stream(StreamParams::new(vec![Message::user("Find rust")]));
    let response = collect_response(stream).await.unwrap();

    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(provider.call_count(), 2);
    assert_eq!(response.turns, 2);

    let ids: Vec<_> = history
        .messages_with_role(Role::Tool)
        .into_iter()
        .filter_map(|m| m.tool_call_id)
        .collect();
    assert_eq!(ids, vec!["c1", "c2"]);
}

#[tokio::test]
async fn test_iteration_limit_ends_session_with_error() {
    let provider = Arc::new(MockProvider::new());
    provider
        .push_chunks(vec![tool_call(0, "a", "search", "{\"q\":1}"), StreamChunk::done(FinishReason::ToolCalls)])
        .push_chunks(vec![tool_call(0, "b", "search", "{\"q\":2}"), StreamChunk::done(FinishReason::ToolCalls)]);
    let history = Arc::new(InMemoryHistory::new());
    let executor = Arc::new(CountingExecutor::default());
    let mut config = fast_config();
    config.tools.max_iterations = 1;

    let stream = StreamController::new(provider.clone(), history.clone(), executor.clone(), config)
        .create_stream(StreamParams::new(vec![Message::user("Loop")]));
    let items: Vec<_> = stream.collect().await;

    assert!(matches!(items.last(), Some(Err(UnillmError::ToolIterationLimit { limit: 1 }))));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn test_continuation_failure_yields_synthetic_terminal_chunk() {
    let provider = Arc::new(MockProvider::new());
    provider.push_chunks(vec![
        StreamChunk::text("Checking. "),
        tool_call(0, "call_1", "lookup", "{\"id\":1}"),
        StreamChunk::done(FinishReason::ToolCalls),
    ]);
    // No further replies: every continuation attempt fails
    let history = Arc::new(InMemoryHistory::new());
    let mut config = fast_config();
    config.retry.max_retries = 1;

    let stream = StreamController::new(provider.clone(), history.clone(), lookup_registry(), config)
        .create_stream(StreamParams::new(vec![Message::user("What is record 1?")]));
    let response = collect_response(stream).await.unwrap();

    assert_eq!(provider.call_count(), 3);
    assert_eq!(response.turns, 2);
    assert_eq!(response.content, "Checking. ");
    let error = response.error.unwrap();
    assert!(error.contains("Continuation stream failed"));
    assert!(error.contains("Failed after 2 attempts"));
    assert_eq!(history.messages_with_role(Role::Tool).len(), 1);
}

#[tokio::test]
async fn test_dropping_stream_during_backoff_releases_session() {
    let provider = Arc::new(MockProvider::new());
    provider.push_error(UnillmError::Transport("connection reset".to_string()));
    let history = Arc::new(InMemoryHistory::new());
    let mut config = fast_config();
    config.retry.base_delay_ms = 60_000;

    let mut stream = StreamController::new(provider.clone(), history.clone(), lookup_registry(), config)
        .create_stream(StreamParams::new(vec![Message::user("hi")]));

    // The first attempt fails and the session parks in a two minute backoff
    let waited = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
    assert!(waited.is_err());
    assert_eq!(provider.call_count(), 1);

    drop(stream);
    assert_eq!(Arc::strong_count(&provider), 1);
    assert_eq!(provider.call_count(), 1);
}

/// Answers with a `lookup` call until the request ends in a tool result, then with text
struct LookupThenAnswer {
    calls: AtomicUsize,
}

#[async_trait]
impl StreamProvider for LookupThenAnswer {
    async fn stream_call(&self, _model: &str, params: &StreamParams) -> Result<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answered = params.messages.last().is_some_and(|m| m.role == Role::Tool);
        let chunks = if answered {
            vec![StreamChunk::text("It is 42."), StreamChunk::done(FinishReason::Stop)]
        } else {
            vec![
                tool_call(0, "call_x", "lookup", "{\"id\":1}"),
                StreamChunk::done(FinishReason::ToolCalls),
            ]
        };
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }
}

#[tokio::test]
async fn test_concurrent_sessions_keep_separate_dedup_state() {
    let provider = Arc::new(LookupThenAnswer {
        calls: AtomicUsize::new(0),
    });
    let history = Arc::new(InMemoryHistory::new());
    let executor = Arc::new(CountingExecutor::default());
    let controller = StreamController::new(provider.clone(), history.clone(), executor.clone(), fast_config());

    let first = controller.create_stream(StreamParams::new(vec![Message::user("What is record 1?")]));
    let second = controller.create_stream(StreamParams::new(vec![Message::user("And record 1 again?")]));
    let (first, second) = tokio::join!(collect_response(first), collect_response(second));
    let (first, second) = (first.unwrap(), second.unwrap());

    // The same call in another session is not a duplicate
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    for response in [&first, &second] {
        assert_eq!(response.turns, 2);
        assert_eq!(response.content, "It is 42.");
        assert!(response.error.is_none());
    }
    assert_eq!(history.messages_with_role(Role::Tool).len(), 2);
}

#[tokio::test]
async fn test_first_turn_failure_is_an_error() {
    let provider = Arc::new(MockProvider::new());
    provider.push_error(UnillmError::InvalidRequest("unknown model".to_string()));
    let history = Arc::new(InMemoryHistory::new());

    let stream = controller(&provider, &history, lookup_registry())
        .create_stream(StreamParams::new(vec![Message::user("hi")]));
    let err = collect_response(stream).await.unwrap_err();

    assert!(matches!(err, UnillmError::InvalidRequest(ref m) if m == "unknown model"));
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_mid_stream_failure_superseded_by_retry() {
    let provider = Arc::new(MockProvider::new());
    provider
        .push(MockReply::Stream(vec![
            Ok(StreamChunk::text("Hel")),
            Err(UnillmError::Transport("connection reset".to_string())),
        ]))
        .push_chunks(vec![StreamChunk::text("Hello "), StreamChunk::text("world").complete()]);
    let history = Arc::new(InMemoryHistory::new());

    let stream = controller(&provider, &history, lookup_registry())
        .create_stream(StreamParams::new(vec![Message::user("Say hello")]));
    let response = collect_response(stream).await.unwrap();

    assert_eq!(provider.call_count(), 2);
    assert_eq!(response.content, "Hello world");
    let assistant = history.messages_with_role(Role::Assistant);
    assert_eq!(assistant.len(), 1);
    assert_eq!(assistant[0].content, "Hello world");
}

#[tokio::test]
async fn test_structured_output_parsed_and_validated() {
    let provider = Arc::new(MockProvider::new());
    provider.push_chunks(vec![
        StreamChunk::text("```json\n{\"city\": \"Oslo\", "),
        StreamChunk::text("\"country\": \"NO\"}\n```").complete(),
    ]);
    let history = Arc::new(InMemoryHistory::new());
    let schema = json!({
        "type": "object",
        "required": ["city", "country"],
        "properties": {"city": {"type": "string"}, "country": {"type": "string"}}
    });

    let params = StreamParams::new(vec![Message::user("Capital of Norway as JSON")]).with_json_output(Some(schema));
    let stream = controller(&provider, &history, lookup_registry()).create_stream(params);
    let response = collect_response(stream).await.unwrap();

    assert_eq!(response.content_object, Some(json!({"city": "Oslo", "country": "NO"})));
    assert!(response.validation_errors.is_empty());
    assert_eq!(response.finish_reason, Some(FinishReason::Stop));
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<UsageEvent>>,
}

#[async_trait]
impl UsageCallback for Recorder {
    async fn on_usage(&self, event: UsageEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[tokio::test]
async fn test_usage_reported_per_turn() {
    let provider = Arc::new(MockProvider::new());
    provider
        .push_chunks(vec![tool_call(0, "c1", "lookup", "{\"id\":1}"), StreamChunk::done(FinishReason::ToolCalls)])
        .push_chunks(vec![StreamChunk::text("Record 1 is 42.").complete()]);
    let history = Arc::new(InMemoryHistory::new());
    let recorder = Arc::new(Recorder::default());

    let stream = controller(&provider, &history, lookup_registry())
        .with_caller_id("billing-test")
        .with_usage_callback(recorder.clone())
        .create_stream(StreamParams::new(vec![Message::user("What is record 1?")]));
    let response = collect_response(stream).await.unwrap();

    let events = recorder.events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.caller_id == "billing-test"));
    // "Record 1 is 42." is 15 chars, 3 estimated tokens
    assert_eq!(events[1].usage.tokens.output.total, 3);
    assert_eq!(response.usage.tokens.output.total, 3);
}
