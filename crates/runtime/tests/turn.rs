//! End-to-end turns against a mock chat-completions server.

use policy::Policy;
use runtime::{
    CompletionClient, Role, Session, StaticContext, ToolContext, ToolRegistry, TurnOutcome,
    validate_history,
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(events: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str(&format!("data: {event}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

async fn mount_sse(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .up_to_n_times(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn streamed_tool_call_then_answer() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join("notes.md"), "").unwrap();

    let server = MockServer::start().await;
    mount_sse(
        &server,
        sse(&[
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "listDir", "arguments": ""}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"dirPath\":\".\"}"}}
            ]}}]}),
        ]),
    )
    .await;
    mount_sse(
        &server,
        sse(&[
            json!({"choices": [{"delta": {"content": "There is "}}]}),
            json!({"choices": [{"delta": {"content": "one file."}}]}),
        ]),
    )
    .await;

    let client = CompletionClient::builder("sk-test", "test-model")
        .base_url(server.uri())
        .build();
    let tools =
        ToolRegistry::with_builtins(ToolContext::new(workspace.path(), Policy::permissive()))
            .unwrap();
    let mut session = Session::new(client, tools, StaticContext::system("be brief"));

    let outcome = session.chat("list files", &mut ()).await.unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::Done {
            reply: Some("There is one file.".into())
        }
    );

    let history = session.history();
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    assert_eq!(history[1].tool_calls()[0].function.arguments, r#"{"dirPath":"."}"#);
    assert!(history[2].text().contains("notes.md"));
    assert_eq!(validate_history(history), Ok(()));

    // The second request carries the tool result, keyed to its call.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    let messages = body["messages"].as_array().unwrap();
    let last = messages.last().unwrap();
    assert_eq!(last["role"], "tool");
    assert_eq!(last["tool_call_id"], "call_1");
    assert!(last.get("timestamp").is_none());
    assert_eq!(body["tool_choice"], "auto");
}

#[tokio::test]
async fn server_error_fails_the_turn_without_a_partial_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let client = CompletionClient::builder("sk-test", "test-model")
        .base_url(server.uri())
        .build();
    let tools = ToolRegistry::new(ToolContext::new(".", Policy::default()));
    let mut session = Session::new(client, tools, StaticContext::default());

    let err = session.chat("hi", &mut ()).await.unwrap_err();
    assert!(err.is_transport());
    assert!(err.to_string().contains("500"));
    assert!(err.to_string().contains("upstream exploded"));
    assert_eq!(session.history().len(), 1);
}
