//! `roxy web`: the chat loop served to a browser over a WebSocket.
//!
//! Every connection drives its own [`Session`]. Frames are JSON objects
//! tagged by `type`; see [`protocol`].

mod protocol;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message as Frame, WebSocket, WebSocketUpgrade};
use axum::response::{Html, IntoResponse, Json};
use axum::routing::get;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use policy::Policy;
use runtime::{
    CompletionClient, Message, Session, ToolCall, ToolContext, ToolRegistry, ToolResult,
    TurnObserver, TurnOutcome, WorkspaceContext,
};
use serde_json::{Value, json};
use storage::{SessionKey, SessionLog, SessionStore};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedSender};
use uuid::Uuid;

use crate::error::Result;
pub use protocol::{ClientMessage, ServerMessage, SessionInfo};

const INDEX_HTML: &str = include_str!("index.html");
const THINKING: &str = "Roxy is thinking...";

type ChatSession = Session<CompletionClient, ToolRegistry, WorkspaceContext, SessionLog>;

/// The frame answering a request, or the text of an `error` frame.
type Reply = std::result::Result<ServerMessage, String>;

/// What every connection needs to open sessions.
pub struct WebState {
    client: CompletionClient,
    workspace: PathBuf,
    policy: Policy,
    store: SessionStore,
    max_iterations: usize,
}

impl WebState {
    pub fn new(
        client: CompletionClient,
        workspace: impl Into<PathBuf>,
        policy: Policy,
        store: SessionStore,
        max_iterations: usize,
    ) -> Self {
        Self {
            client,
            workspace: workspace.into(),
            policy,
            store,
            max_iterations,
        }
    }

    fn open_session(&self, log: SessionLog) -> Result<ChatSession> {
        let history: Vec<Message> = log.load()?;
        let tools =
            ToolRegistry::with_builtins(ToolContext::new(&self.workspace, self.policy.clone()))?;
        let session = Session::new(
            self.client.clone(),
            tools,
            WorkspaceContext::new(&self.workspace),
        )
        .with_max_iterations(self.max_iterations)
        .with_history(history)?
        .with_store(log);
        Ok(session)
    }
}

pub fn router(state: Arc<WebState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ws", get(upgrade))
        .with_state(state)
}

/// Serve until the listener fails.
pub async fn serve(state: WebState, host: &str, port: u16) -> Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    println!("roxy web listening on http://{addr}");
    tracing::info!(%addr, "web server started");

    axum::serve(listener, router(Arc::new(state))).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WebState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection(socket, state))
}

/// `web_<millis>_<9 hex chars>`; already in the store's file-name alphabet.
fn new_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("web_{}_{}", Utc::now().timestamp_millis(), &suffix[..9])
}

fn same_session(a: &str, b: &str) -> bool {
    SessionKey::new(a).file_name() == SessionKey::new(b).file_name()
}

async fn connection(socket: WebSocket, state: Arc<WebState>) {
    let (mut sink, mut frames) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode frame");
                    continue;
                }
            };
            if sink.send(Frame::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let id = new_session_id();
    let mut chat = match state.open_session(state.store.log(id.as_str())) {
        Ok(session) => Chat { id, session },
        Err(e) => {
            tracing::warn!(error = %e, "failed to open web session");
            let _ = tx.send(ServerMessage::error(e.to_string()));
            drop(tx);
            let _ = writer.await;
            return;
        }
    };
    tracing::info!(session = %chat.id, "client connected");
    let _ = tx.send(ServerMessage::Connected {
        session_id: chat.id.clone(),
    });

    while let Some(frame) = frames.next().await {
        let text = match frame {
            Ok(Frame::Text(text)) => text,
            Ok(Frame::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(message) => chat.handle(message, &state, &tx).await,
            Err(e) => {
                let _ = tx.send(ServerMessage::error(format!("unrecognized message: {e}")));
            }
        }
    }

    tracing::info!(session = %chat.id, "client disconnected");
    drop(tx);
    let _ = writer.await;
}

/// The session a connection is currently talking to.
struct Chat {
    id: String,
    session: ChatSession,
}

impl Chat {
    async fn handle(
        &mut self,
        message: ClientMessage,
        state: &WebState,
        tx: &UnboundedSender<ServerMessage>,
    ) {
        let reply = match message {
            ClientMessage::Message { content } => {
                if content.trim().is_empty() {
                    Err("message is empty".to_string())
                } else {
                    let _ = tx.send(ServerMessage::Typing {
                        content: THINKING.into(),
                    });
                    let mut observer = Relay { tx: tx.clone() };
                    let result = self.session.chat(content, &mut observer).await;
                    self.finish(result)
                }
            }
            ClientMessage::Retry => {
                let _ = tx.send(ServerMessage::Typing {
                    content: THINKING.into(),
                });
                let mut observer = Relay { tx: tx.clone() };
                let result = self.session.retry(&mut observer).await;
                self.finish(result)
            }
            ClientMessage::GetSessions => state
                .store
                .list()
                .map(|list| ServerMessage::SessionsList {
                    sessions: list.into_iter().map(SessionInfo::from).collect(),
                })
                .map_err(|e| format!("cannot list sessions: {e}")),
            ClientMessage::SwitchSession { session_id } => self.switch(session_id, state, tx),
            ClientMessage::CreateSession => self.create(state),
            ClientMessage::DeleteSession { session_id } => self.delete(session_id, state),
        };

        let frame = reply.unwrap_or_else(ServerMessage::error);
        let _ = tx.send(frame);
    }

    fn finish(&self, result: runtime::Result<TurnOutcome>) -> Reply {
        match result {
            Ok(TurnOutcome::Done { reply }) => Ok(ServerMessage::Done {
                content: reply,
                limit_reached: false,
            }),
            Ok(TurnOutcome::LimitReached { .. }) => Ok(ServerMessage::Done {
                content: self.session.history().last().map(|m| m.text().to_string()),
                limit_reached: true,
            }),
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "web turn failed");
                Err(e.to_string())
            }
        }
    }

    fn switch(
        &mut self,
        session_id: String,
        state: &WebState,
        tx: &UnboundedSender<ServerMessage>,
    ) -> Reply {
        if session_id.trim().is_empty() {
            return Err("sessionId is required".into());
        }
        let session = state
            .open_session(state.store.log(session_id.as_str()))
            .map_err(|e| format!("cannot open session {session_id}: {e}"))?;
        self.session = session;
        self.id = session_id.clone();
        tracing::debug!(session = %self.id, "switched session");

        let _ = tx.send(ServerMessage::SessionSwitched {
            message: format!("Switched to session {session_id}"),
            session_id,
        });
        Ok(ServerMessage::SessionHistory {
            history: self.session.history().to_vec(),
        })
    }

    fn create(&self, state: &WebState) -> Reply {
        let id = new_session_id();
        state
            .store
            .create(id.as_str())
            .map_err(|e| format!("cannot create session: {e}"))?;
        Ok(ServerMessage::SessionCreated {
            message: format!("Created session {id}"),
            session_id: id,
        })
    }

    fn delete(&self, session_id: String, state: &WebState) -> Reply {
        if session_id.trim().is_empty() {
            return Err("sessionId is required".into());
        }
        if same_session(&session_id, &self.id) {
            return Err("cannot delete the current session".into());
        }
        match state.store.delete(session_id.as_str()) {
            Ok(true) => Ok(ServerMessage::SessionDeleted {
                message: format!("Deleted session {session_id}"),
                session_id,
            }),
            Ok(false) => Err(format!("session {session_id} not found")),
            Err(e) => Err(format!("cannot delete session {session_id}: {e}")),
        }
    }
}

/// Forwards turn progress to the socket writer.
struct Relay {
    tx: UnboundedSender<ServerMessage>,
}

impl TurnObserver for Relay {
    fn on_delta(&mut self, delta: &str) {
        let _ = self.tx.send(ServerMessage::Stream {
            content: delta.to_string(),
        });
    }

    fn on_tool_calls(&mut self, calls: &[ToolCall]) {
        for call in calls {
            let args = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
            let _ = self.tx.send(ServerMessage::ToolCall {
                tool_name: call.name().to_string(),
                args,
            });
        }
    }

    fn on_tool_results(&mut self, results: &[ToolResult]) {
        for result in results {
            let _ = self.tx.send(ServerMessage::ToolResult {
                tool_name: result.name.clone(),
                result: result.content(),
                is_error: result.is_error(),
            });
        }
    }
}
