//! OpenAI-compatible chat completions backend.

use crate::model::{
    Backend, DeltaSink, Message, ModelError, ModelRequest, Role, ToolCall, ToolChoice, ToolSpec,
};
use crate::stream::decode_stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const COMPLETIONS_PATH: &str = "/chat/completions";

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

/// History message without local bookkeeping such as timestamps.
#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: Role,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<&'a [ToolCall]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ApiFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ApiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating a completion client.
#[derive(Debug, Clone)]
pub struct CompletionClientBuilder {
    api_key: String,
    model: String,
    base_url: String,
    stream: bool,
}

impl CompletionClientBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            stream: true,
        }
    }

    /// Endpoint root; `/chat/completions` is appended.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Whether to request an event stream.
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn build(self) -> CompletionClient {
        let endpoint = format!("{}{COMPLETIONS_PATH}", self.base_url.trim_end_matches('/'));
        CompletionClient {
            http: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            endpoint,
            stream: self.stream,
        }
    }
}

/// Client for one chat-completions endpoint. Clones share one connection pool.
#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    stream: bool,
}

impl CompletionClient {
    pub fn builder(
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> CompletionClientBuilder {
        CompletionClientBuilder::new(api_key, model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn message_to_api(msg: &Message) -> ApiMessage<'_> {
        ApiMessage {
            role: msg.role,
            content: msg.content.as_deref(),
            tool_calls: msg.tool_calls.as_deref(),
            tool_call_id: msg.tool_call_id.as_deref(),
        }
    }

    fn tool_to_api(spec: &ToolSpec) -> ApiTool<'_> {
        ApiTool {
            kind: "function",
            function: ApiFunction {
                name: &spec.name,
                description: &spec.description,
                parameters: &spec.parameters,
            },
        }
    }

    fn build_request<'a>(&'a self, request: &ModelRequest<'a>) -> ApiRequest<'a> {
        let tools: Vec<ApiTool<'a>> = request.tools.iter().map(Self::tool_to_api).collect();
        let tool_choice = (!tools.is_empty()).then_some(request.tool_choice);

        ApiRequest {
            model: &self.model,
            messages: request.messages.iter().map(Self::message_to_api).collect(),
            stream: self.stream,
            tools,
            tool_choice,
        }
    }

    fn response_to_message(response: ApiResponse) -> Result<Message, ModelError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("response has no choices".into()))?;

        Ok(Message::reply(
            choice.message.content,
            choice.message.tool_calls.unwrap_or_default(),
        ))
    }
}

impl std::fmt::Display for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chat-completions({}, stream={})", self.model, self.stream)
    }
}

impl Backend for CompletionClient {
    async fn complete(
        &self,
        request: ModelRequest<'_>,
        mut on_delta: Option<DeltaSink<'_>>,
    ) -> Result<Message, ModelError> {
        let api_request = self.build_request(&request);
        tracing::debug!(
            endpoint = %self.endpoint,
            messages = api_request.messages.len(),
            tools = api_request.tools.len(),
            stream = self.stream,
            "sending completion request"
        );

        let accept = if self.stream {
            "text/event-stream"
        } else {
            "application/json"
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("accept", accept)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.ok().filter(|b| !b.is_empty());
            return Err(ModelError::Api { status, body });
        }

        if self.stream {
            return decode_stream(response.bytes_stream(), |delta| {
                if let Some(sink) = on_delta.as_mut() {
                    sink(delta);
                }
            })
            .await;
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        Self::response_to_message(api_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn history() -> Vec<Message> {
        vec![Message::system("be brief"), Message::user("list files")]
    }

    fn list_dir_spec() -> ToolSpec {
        ToolSpec {
            name: "listDir".into(),
            description: "List a directory".into(),
            parameters: json!({"type": "object", "properties": {"dirPath": {"type": "string"}}}),
        }
    }

    fn client(server: &MockServer, stream: bool) -> CompletionClient {
        CompletionClient::builder("test-key", "deepseek-chat")
            .base_url(server.uri())
            .stream(stream)
            .build()
    }

    fn tool_call_body() -> Value {
        json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "listDir", "arguments": "{\"dirPath\":\".\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })
    }

    const TOOL_CALL_SSE: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"listDir\",\"arguments\":\"\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"dirPath\\\":\\\".\\\"}\"}}]}}]}\n\n",
        "data: [DONE]\n\n",
    );

    #[tokio::test]
    async fn sends_bearer_auth_and_tools() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "deepseek-chat",
                "tool_choice": "auto",
                "tools": [{"type": "function", "function": {"name": "listDir"}}],
                "messages": [{"role": "system", "content": "be brief"}, {"role": "user", "content": "list files"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hello"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let messages = history();
        let tools = [list_dir_spec()];
        let request = ModelRequest {
            messages: &messages,
            tools: &tools,
            tool_choice: ToolChoice::Auto,
        };
        let message = client(&server, false).complete(request, None).await.unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text(), "hello");
        assert!(message.tool_calls.is_none());
    }

    #[test]
    fn request_omits_tools_and_timestamps_when_absent() {
        let client = CompletionClient::builder("k", "m").stream(false).build();
        let messages = history();
        let request = ModelRequest {
            messages: &messages,
            tools: &[],
            tool_choice: ToolChoice::Auto,
        };
        let json = serde_json::to_value(client.build_request(&request)).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
        assert!(json.get("stream").is_none());
        assert!(json["messages"][0].get("timestamp").is_none());
    }

    #[tokio::test]
    async fn non_success_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let messages = history();
        let request = ModelRequest {
            messages: &messages,
            tools: &[],
            tool_choice: ToolChoice::Auto,
        };
        let err = client(&server, true).complete(request, None).await.unwrap_err();
        match err {
            ModelError::Api { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body.as_deref(), Some("invalid api key"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let messages = history();
        let request = ModelRequest {
            messages: &messages,
            tools: &[],
            tool_choice: ToolChoice::Auto,
        };
        let err = client(&server, false).complete(request, None).await.unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn streaming_forwards_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let messages = history();
        let request = ModelRequest {
            messages: &messages,
            tools: &[],
            tool_choice: ToolChoice::Auto,
        };
        let mut seen = Vec::new();
        let mut sink = |d: &str| seen.push(d.to_string());
        let message = client(&server, true)
            .complete(request, Some(&mut sink))
            .await
            .unwrap();

        assert_eq!(message.text(), "Hello");
        assert_eq!(seen, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn streaming_and_plain_replies_have_same_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(TOOL_CALL_SSE, "text/event-stream"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_body()))
            .mount(&server)
            .await;

        let messages = history();
        let tools = [list_dir_spec()];
        let request = ModelRequest {
            messages: &messages,
            tools: &tools,
            tool_choice: ToolChoice::Auto,
        };

        let streamed = client(&server, true)
            .complete(request.clone(), None)
            .await
            .unwrap();
        let plain = client(&server, false).complete(request, None).await.unwrap();

        assert_eq!(streamed.role, plain.role);
        assert_eq!(streamed.content, plain.content);
        assert_eq!(streamed.tool_calls, plain.tool_calls);
        assert_eq!(
            plain.tool_calls(),
            &[ToolCall::new("call_1", "listDir", r#"{"dirPath":"."}"#)]
        );
    }
}
