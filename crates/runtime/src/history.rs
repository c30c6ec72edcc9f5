//! Conversation history invariants and persistence.

use crate::model::{Message, Role};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("tool message at index {index} has no tool_call_id")]
    MissingCallId { index: usize },

    #[error("tool message at index {index} answers unknown call {call_id}")]
    OrphanToolResult { index: usize, call_id: String },
}

/// Check that every `tool` message answers a call made by the closest
/// preceding assistant message.
pub fn validate_history(messages: &[Message]) -> Result<(), HistoryError> {
    let mut open: HashSet<&str> = HashSet::new();

    for (index, message) in messages.iter().enumerate() {
        match message.role {
            Role::Assistant => {
                open = message.tool_calls().iter().map(|c| c.id.as_str()).collect();
            }
            Role::Tool => {
                let call_id = message
                    .tool_call_id
                    .as_deref()
                    .ok_or(HistoryError::MissingCallId { index })?;
                if !open.contains(call_id) {
                    return Err(HistoryError::OrphanToolResult {
                        index,
                        call_id: call_id.to_string(),
                    });
                }
            }
            Role::System | Role::User => {}
        }
    }
    Ok(())
}

/// Durable sink for history entries, written as each entry is appended.
pub trait HistoryStore: Send {
    fn append(&mut self, message: &Message) -> Result<(), storage::Error>;
}

/// No persistence.
impl HistoryStore for () {
    fn append(&mut self, _message: &Message) -> Result<(), storage::Error> {
        Ok(())
    }
}

impl HistoryStore for storage::SessionLog {
    fn append(&mut self, message: &Message) -> Result<(), storage::Error> {
        storage::SessionLog::append(self, message)
    }
}
