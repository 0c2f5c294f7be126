//! Conversation history store
//!
//! Storage and truncation policy belong to the caller; the stream core only appends
//! messages and reads the ordered list back for continuations.

use std::sync::Mutex;

use crate::error::Result;
use crate::types::{Message, Role};

/// Ordered conversation history.
///
/// Implementations use interior mutability; one call at a time writes to a given store.
pub trait HistoryStore: Send + Sync {
    /// Append a message
    fn add_message(&self, message: Message) -> Result<()>;

    /// All messages in insertion order
    fn historical_messages(&self) -> Vec<Message>;
}

/// Vec-backed history
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    messages: Mutex<Vec<Message>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a history with existing messages
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Mutex::new(messages),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages with the given role, in order
    pub fn messages_with_role(&self, role: Role) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.role == role)
            .cloned()
            .collect()
    }
}

impl HistoryStore for InMemoryHistory {
    fn add_message(&self, message: Message) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
        Ok(())
    }

    fn historical_messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
