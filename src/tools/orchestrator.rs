//! Tool orchestration: dedup, execute, commit.
//!
//! Dedup and iteration state live in a [`ToolSession`] owned by the caller, one per
//! logical stream, so concurrent sessions sharing an orchestrator never interact.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ToolExecutor;
use super::canonical::{call_key, canonical_json};
use crate::error::{Result, UnillmError};
use crate::history::HistoryStore;
use crate::types::{Message, ToolCall};

/// Default maximum number of executed tool batches per session.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// A tool call already executed in this session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalledToolRecord {
    pub name: String,
    /// Canonical JSON of the arguments
    pub arguments: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-session dedup set and iteration counter
#[derive(Debug, Clone)]
pub struct ToolSession {
    called: Vec<CalledToolRecord>,
    keys: HashSet<String>,
    iterations: usize,
    max_iterations: usize,
}

impl ToolSession {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            called: Vec::new(),
            keys: HashSet::new(),
            iterations: 0,
            max_iterations,
        }
    }

    /// Executed batches so far
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn called(&self) -> &[CalledToolRecord] {
        &self.called
    }

    /// Split `calls` into (new, duplicate) and record the new ones.
    ///
    /// A repeat inside the same batch counts as a duplicate of its first occurrence.
    pub fn filter_new(&mut self, calls: &[ToolCall]) -> (Vec<ToolCall>, Vec<ToolCall>) {
        let mut fresh = Vec::new();
        let mut duplicates = Vec::new();

        for call in calls {
            if self.keys.insert(call_key(&call.name, &call.arguments)) {
                self.called.push(CalledToolRecord {
                    name: call.name.clone(),
                    arguments: canonical_json(&call.arguments),
                    timestamp: Utc::now(),
                });
                fresh.push(call.clone());
            } else {
                duplicates.push(call.clone());
            }
        }
        (fresh, duplicates)
    }

    fn begin_iteration(&mut self) -> Result<()> {
        self.iterations += 1;
        if self.iterations > self.max_iterations {
            return Err(UnillmError::ToolIterationLimit {
                limit: self.max_iterations,
            });
        }
        Ok(())
    }
}

impl Default for ToolSession {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

/// Result of processing one batch of tool calls
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolBatchOutcome {
    /// Executed calls with `result`/`error` filled in
    pub new_tool_calls: Vec<ToolCall>,
    /// Calls dropped as duplicates
    pub skipped: Vec<ToolCall>,
    /// True when history gained tool results and the model should continue
    pub requires_resubmission: bool,
}

/// Executes a turn's tool calls and commits their results to history
pub struct ToolOrchestrator {
    executor: Arc<dyn ToolExecutor>,
    history: Arc<dyn HistoryStore>,
    max_iterations: usize,
}

impl ToolOrchestrator {
    pub fn new(executor: Arc<dyn ToolExecutor>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            executor,
            history,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Fresh dedup and iteration state for one logical stream
    pub fn new_session(&self) -> ToolSession {
        ToolSession::new(self.max_iterations)
    }

    /// Dedup, execute and commit one batch.
    ///
    /// Writes one `Role::Tool` message per call in the batch, answering each with the
    /// provider-issued id. Duplicates are answered with a "skipped" note and never
    /// executed. Fails with `ToolIterationLimit` before executing anything once the
    /// session has used up its batches, and with `ToolExecution` if the executor breaks.
    pub async fn process_tool_calls(&self, session: &mut ToolSession, tool_calls: &[ToolCall]) -> Result<ToolBatchOutcome> {
        if tool_calls.is_empty() {
            return Ok(ToolBatchOutcome::default());
        }

        let (fresh, skipped) = session.filter_new(tool_calls);
        if fresh.is_empty() {
            tracing::info!(skipped = skipped.len(), "every tool call in the batch was a duplicate");
            self.commit_skipped(&skipped)?;
            return Ok(ToolBatchOutcome {
                new_tool_calls: Vec::new(),
                skipped,
                requires_resubmission: false,
            });
        }

        session.begin_iteration()?;
        tracing::debug!(
            iteration = session.iterations(),
            max = session.max_iterations(),
            calls = fresh.len(),
            "executing tool batch"
        );

        let mut executed = Vec::with_capacity(fresh.len());
        for mut call in fresh {
            let outcome = self
                .executor
                .execute(&call.name, &call.arguments)
                .await
                .map_err(|e| UnillmError::ToolExecution {
                    tool: call.name.clone(),
                    message: e.to_string(),
                })?;

            let message = match &outcome.error {
                Some(error) => {
                    tracing::warn!(tool = %call.name, id = %call.id, error = %error, "tool reported an error");
                    Message::tool_error(&call.id, error)
                }
                None => Message::tool_result(&call.id, outcome.result.clone().unwrap_or_default()),
            };
            self.history.add_message(message)?;

            call.result = outcome.result;
            call.error = outcome.error;
            executed.push(call);
        }
        self.commit_skipped(&skipped)?;

        Ok(ToolBatchOutcome {
            new_tool_calls: executed,
            skipped,
            requires_resubmission: true,
        })
    }

    fn commit_skipped(&self, skipped: &[ToolCall]) -> Result<()> {
        for call in skipped {
            self.history.add_message(Message::tool_result(
                &call.id,
                format!("Skipped: {} was already called with these arguments", call.name),
            ))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ToolOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolOrchestrator")
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;
    use crate::tools::ToolOutcome;
    use crate::types::Role;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolExecutor for CountingExecutor {
        async fn execute(&self, name: &str, arguments: &Value) -> Result<ToolOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match name {
                "lookup" => Ok(ToolOutcome::success("42")),
                "missing" => Ok(ToolOutcome::failure("no such record")),
                "explode" => Err(UnillmError::Transport("executor offline".to_string())),
                _ => Ok(ToolOutcome::success(arguments.to_string())),
            }
        }
    }

    fn setup(max_iterations: usize) -> (Arc<CountingExecutor>, Arc<InMemoryHistory>, ToolOrchestrator) {
        let executor = Arc::new(CountingExecutor::default());
        let history = Arc::new(InMemoryHistory::new());
        let orchestrator =
            ToolOrchestrator::new(executor.clone(), history.clone()).with_max_iterations(max_iterations);
        (executor, history, orchestrator)
    }

    #[tokio::test]
    async fn test_result_committed_with_original_id() {
        let (_, history, orchestrator) = setup(20);
        let mut session = orchestrator.new_session();

        let outcome = orchestrator
            .process_tool_calls(&mut session, &[ToolCall::new("call_abc", "lookup", json!({"id": 1}))])
            .await
            .unwrap();

        assert!(outcome.requires_resubmission);
        assert_eq!(outcome.new_tool_calls[0].result.as_deref(), Some("42"));
        let tool_messages = history.messages_with_role(Role::Tool);
        assert_eq!(tool_messages.len(), 1);
        assert_eq!(tool_messages[0].content, "42");
        assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("call_abc"));
    }

    #[tokio::test]
    async fn test_duplicate_across_batches_is_filtered() {
        let (executor, history, orchestrator) = setup(20);
        let mut session = orchestrator.new_session();

        orchestrator
            .process_tool_calls(&mut session, &[ToolCall::new("a", "lookup", json!({"x": 1, "y": 2}))])
            .await
            .unwrap();
        let second = orchestrator
            .process_tool_calls(&mut session, &[ToolCall::new("b", "lookup", json!({"y": 2, "x": 1}))])
            .await
            .unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert!(second.new_tool_calls.is_empty());
        assert!(!second.requires_resubmission);
        assert_eq!(second.skipped[0].id, "b");
        assert_eq!(session.iterations(), 1);
        // Every call id is still answered
        assert_eq!(history.messages_with_role(Role::Tool).len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_within_batch() {
        let (executor, _, orchestrator) = setup(20);
        let mut session = orchestrator.new_session();

        let outcome = orchestrator
            .process_tool_calls(
                &mut session,
                &[
                    ToolCall::new("a", "echo", json!({"q": "rust"})),
                    ToolCall::new("b", "echo", json!({"q": "rust"})),
                    ToolCall::new("c", "echo", json!({"q": "tokio"})),
                ],
            )
            .await
            .unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        let ids: Vec<_> = outcome.new_tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(outcome.requires_resubmission);
        assert_eq!(session.called().len(), 2);
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let (executor, _, orchestrator) = setup(20);
        let mut session = orchestrator.new_session();

        for i in 0..20 {
            orchestrator
                .process_tool_calls(&mut session, &[ToolCall::new(format!("c{i}"), "echo", json!({"n": i}))])
                .await
                .unwrap();
        }
        let err = orchestrator
            .process_tool_calls(&mut session, &[ToolCall::new("c20", "echo", json!({"n": 20}))])
            .await
            .unwrap_err();

        assert!(matches!(err, UnillmError::ToolIterationLimit { limit: 20 }));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_tool_error_committed_as_message() {
        let (_, history, orchestrator) = setup(20);
        let mut session = orchestrator.new_session();

        let outcome = orchestrator
            .process_tool_calls(&mut session, &[ToolCall::new("m1", "missing", json!({}))])
            .await
            .unwrap();

        assert!(outcome.requires_resubmission);
        let messages = history.messages_with_role(Role::Tool);
        assert_eq!(messages[0].error.as_deref(), Some("no such record"));
        assert_eq!(messages[0].content, "Error: no such record");
    }

    #[tokio::test]
    async fn test_executor_failure_is_fatal() {
        let (_, history, orchestrator) = setup(20);
        let mut session = orchestrator.new_session();

        let err = orchestrator
            .process_tool_calls(&mut session, &[ToolCall::new("x", "explode", json!({}))])
            .await
            .unwrap_err();

        assert!(matches!(err, UnillmError::ToolExecution { ref tool, .. } if tool == "explode"));
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let (executor, _, orchestrator) = setup(20);
        let call = ToolCall::new("a", "lookup", json!({"id": 1}));

        let mut first = orchestrator.new_session();
        let mut second = orchestrator.new_session();
        orchestrator.process_tool_calls(&mut first, &[call.clone()]).await.unwrap();
        let outcome = orchestrator.process_tool_calls(&mut second, &[call]).await.unwrap();

        assert!(outcome.requires_resubmission);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }
}
