//! Roxy runtime: the turn-execution core of the agent.
//!
//! The runtime is organized around these concepts:
//!
//! - **Backend**: one completion exchange against a chat-completions endpoint.
//!   [`CompletionClient`] speaks the OpenAI-compatible wire format, streaming
//!   or not, and always returns one finalized [`Message`].
//! - **StreamDecoder**: reassembles an event stream into content and tool
//!   calls, whatever the chunk boundaries.
//! - **ToolHost**: a registry of tools executed concurrently per batch, with
//!   results returned in call order.
//! - **Session**: the turn loop. It alternates completion requests and tool
//!   execution until the model answers or the iteration bound is hit.
//!
//! # Example
//!
//! ```no_run
//! use policy::Policy;
//! use runtime::{CompletionClient, Session, StaticContext, ToolContext, ToolRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CompletionClient::builder("sk-...", "deepseek-chat")
//!     .base_url("https://api.deepseek.com/v1")
//!     .build();
//! let tools = ToolRegistry::with_builtins(ToolContext::new(".", Policy::default()))?;
//! let context = StaticContext::system("You are a helpful assistant.");
//!
//! let mut session = Session::new(client, tools, context);
//! let outcome = session.chat("What files are here?", &mut ()).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

mod context;
mod error;
mod history;
pub mod model;
mod providers;
mod session;
pub mod stream;
pub mod tools;

pub use context::{
    ContextBuilder, DEFAULT_SYSTEM_PROMPT, StaticContext, WORKSPACE_FILES, WorkspaceContext,
};
pub use error::{Error, Result};
pub use history::{HistoryError, HistoryStore, validate_history};
pub use model::{Backend, Message, ModelError, ModelRequest, Role, ToolCall, ToolChoice, ToolSpec};
pub use providers::{CompletionClient, CompletionClientBuilder};
pub use session::{
    ArgumentParseFailure, DEFAULT_MAX_ITERATIONS, Session, TurnObserver, TurnOutcome,
};
pub use stream::StreamDecoder;
pub use tools::{
    RegistrationError, Tool, ToolContext, ToolError, ToolHost, ToolInvocation, ToolOutcome,
    ToolRegistry, ToolResult,
};
