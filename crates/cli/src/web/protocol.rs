//! JSON frames exchanged over the chat WebSocket.

use chrono::{DateTime, Utc};
use runtime::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::SessionSummary;

/// Frames sent by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Run a turn for this user message.
    Message { content: String },
    /// Resume the last turn after a failure.
    Retry,
    GetSessions,
    SwitchSession { session_id: String },
    CreateSession,
    DeleteSession { session_id: String },
}

/// Frames sent to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First frame on every connection.
    Connected { session_id: String },
    Typing { content: String },
    Stream { content: String },
    ToolCall { tool_name: String, args: Value },
    ToolResult {
        tool_name: String,
        result: String,
        is_error: bool,
    },
    /// The turn is over. `content` is the final reply, if there was one.
    Done {
        content: Option<String>,
        limit_reached: bool,
    },
    SessionsList { sessions: Vec<SessionInfo> },
    SessionSwitched { session_id: String, message: String },
    SessionHistory { history: Vec<Message> },
    SessionCreated { session_id: String, message: String },
    SessionDeleted { session_id: String, message: String },
    Error { content: String },
}

impl ServerMessage {
    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub messages: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<SessionSummary> for SessionInfo {
    fn from(summary: SessionSummary) -> Self {
        Self {
            id: summary.name,
            messages: summary.record_count,
            updated_at: summary.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_use_type_tags_and_camel_case_fields() {
        let parsed: ClientMessage =
            serde_json::from_value(json!({"type": "switch_session", "sessionId": "web-1"}))
                .unwrap();
        assert_eq!(
            parsed,
            ClientMessage::SwitchSession {
                session_id: "web-1".into()
            }
        );

        let parsed: ClientMessage =
            serde_json::from_value(json!({"type": "message", "content": "hi"})).unwrap();
        assert_eq!(parsed, ClientMessage::Message { content: "hi".into() });

        assert!(serde_json::from_value::<ClientMessage>(json!({"type": "dance"})).is_err());
    }

    #[test]
    fn server_frames_serialize_flat() {
        let frame = ServerMessage::ToolCall {
            tool_name: "listDir".into(),
            args: json!({"dirPath": "."}),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "tool_call", "toolName": "listDir", "args": {"dirPath": "."}})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::error("boom")).unwrap(),
            json!({"type": "error", "content": "boom"})
        );
    }
}
