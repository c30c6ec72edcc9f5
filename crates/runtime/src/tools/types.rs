//! Tool dispatch types.

use super::ToolError;
use crate::model::{Message, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One tool call submitted for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    /// JSON-encoded arguments object.
    pub arguments: String,
    /// Call id from the model. Generated at dispatch when absent.
    pub id: Option<String>,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Build an invocation from a decoded call.
    pub fn from_call(call: &ToolCall) -> Self {
        Self {
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
            id: (!call.id.is_empty()).then(|| call.id.clone()),
        }
    }
}

/// Outcome of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { output: Value },
    Failure { error: ToolError },
}

/// Result of one invocation, paired with its call id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub tool_call_id: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(
        name: impl Into<String>,
        tool_call_id: impl Into<String>,
        output: Value,
    ) -> Self {
        Self {
            name: name.into(),
            tool_call_id: tool_call_id.into(),
            outcome: ToolOutcome::Success { output },
        }
    }

    pub fn failure(
        name: impl Into<String>,
        tool_call_id: impl Into<String>,
        error: ToolError,
    ) -> Self {
        Self {
            name: name.into(),
            tool_call_id: tool_call_id.into(),
            outcome: ToolOutcome::Failure { error },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Failure { .. })
    }

    /// Text fed back to the model as the tool message content.
    pub fn content(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { output } => match output {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
            },
            ToolOutcome::Failure { error } => {
                json!({"success": false, "error": error.to_string()}).to_string()
            }
        }
    }

    /// The `tool` history message for this result.
    pub fn to_message(&self) -> Message {
        Message::tool(&self.tool_call_id, self.content())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    #[test]
    fn invocation_from_call_drops_empty_id() {
        let inv = ToolInvocation::from_call(&ToolCall::new("", "listDir", "{}"));
        assert_eq!(inv.id, None);
        let inv = ToolInvocation::from_call(&ToolCall::new("call_1", "listDir", "{}"));
        assert_eq!(inv.id.as_deref(), Some("call_1"));
    }

    #[test]
    fn content_passes_strings_through() {
        let result = ToolResult::success("readFile", "c1", Value::String("hello".into()));
        assert_eq!(result.content(), "hello");
    }

    #[test]
    fn content_pretty_prints_structures() {
        let result = ToolResult::success("listDir", "c1", json!(["a", "b"]));
        assert_eq!(result.content(), "[\n  \"a\",\n  \"b\"\n]");
    }

    #[test]
    fn failure_content_is_error_object() {
        let result = ToolResult::failure("x", "c1", ToolError::NotFound("x".into()));
        let parsed: Value = serde_json::from_str(&result.content()).unwrap();
        assert_eq!(parsed, json!({"success": false, "error": "tool not found: x"}));
        assert!(result.is_error());
    }

    #[test]
    fn to_message_tags_call_id() {
        let msg = ToolResult::success("x", "call_7", json!("ok")).to_message();
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_7"));
        assert_eq!(msg.text(), "ok");
    }
}
