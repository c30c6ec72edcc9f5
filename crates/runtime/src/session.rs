//! Turn orchestration.
//!
//! A [`Session`] owns the conversation history and drives each turn through
//! a small state machine: request a completion, execute any tool calls it
//! carries, feed the results back, and repeat until the model answers
//! without tools or the iteration bound is hit.

use crate::context::ContextBuilder;
use crate::history::{HistoryStore, validate_history};
use crate::model::{Backend, Message, ModelRequest, Role, ToolCall, ToolChoice};
use crate::tools::{ToolHost, ToolInvocation, ToolResult};
use crate::{Error, Result};
use serde_json::Value;
use uuid::Uuid;

/// Completion requests allowed per turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 7;

/// A tool call whose arguments were not valid JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentParseFailure {
    pub call_id: String,
    pub tool: String,
    pub error: String,
}

/// Hooks for watching a turn as it runs. All hooks default to no-ops.
pub trait TurnObserver: Send {
    /// A streamed content fragment.
    fn on_delta(&mut self, _delta: &str) {}

    /// The model requested these calls; they are about to run.
    fn on_tool_calls(&mut self, _calls: &[ToolCall]) {}

    fn on_argument_error(&mut self, _failure: &ArgumentParseFailure) {}

    /// Results of one batch, in call order.
    fn on_tool_results(&mut self, _results: &[ToolResult]) {}
}

impl TurnObserver for () {}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without requesting tools.
    Done { reply: Option<String> },
    /// The iteration bound was hit; a notice was appended to the history.
    LimitReached { iterations: usize },
}

enum State {
    Requesting,
    Executing(Message),
    Done(Option<String>),
    LimitReached,
}

/// A conversation driven against a completion backend.
pub struct Session<B, T, C, S = ()> {
    backend: B,
    tools: T,
    context: C,
    store: S,
    history: Vec<Message>,
    max_iterations: usize,
}

impl<B, T, C> Session<B, T, C>
where
    B: Backend,
    T: ToolHost,
    C: ContextBuilder,
{
    /// Create a session with an empty, unpersisted history.
    pub fn new(backend: B, tools: T, context: C) -> Self {
        Self {
            backend,
            tools,
            context,
            store: (),
            history: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl<B, T, C, S> Session<B, T, C, S>
where
    B: Backend,
    T: ToolHost,
    C: ContextBuilder,
    S: HistoryStore,
{
    /// Persist every appended message to `store`.
    pub fn with_store<S2: HistoryStore>(self, store: S2) -> Session<B, T, C, S2> {
        Session {
            backend: self.backend,
            tools: self.tools,
            context: self.context,
            store,
            history: self.history,
            max_iterations: self.max_iterations,
        }
    }

    /// Resume from a previously stored history.
    pub fn with_history(mut self, history: Vec<Message>) -> Result<Self> {
        validate_history(&history)?;
        self.history = history;
        Ok(self)
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run one turn for a new user message.
    pub async fn chat(
        &mut self,
        input: impl Into<String>,
        observer: &mut impl TurnObserver,
    ) -> Result<TurnOutcome> {
        self.append(Message::user(input))?;
        self.run(observer).await
    }

    /// Resume a turn that failed before the model answered.
    ///
    /// The history must end with the turn's user message or with the tool
    /// results of its last completed round. Nothing is appended again; the
    /// loop continues from what is already recorded.
    pub async fn retry(&mut self, observer: &mut impl TurnObserver) -> Result<TurnOutcome> {
        match self.history.last().map(|m| m.role) {
            Some(Role::User | Role::Tool) => self.run(observer).await,
            _ => Err(Error::InvalidState(
                "nothing to retry: the turn already has an answer".into(),
            )),
        }
    }

    async fn run(&mut self, observer: &mut impl TurnObserver) -> Result<TurnOutcome> {
        let mut state = State::Requesting;
        let mut iterations = 0;

        loop {
            state = match state {
                State::Requesting if iterations >= self.max_iterations => State::LimitReached,
                State::Requesting => {
                    iterations += 1;
                    tracing::debug!(iteration = iterations, "requesting completion");

                    let reply = self.request(observer).await?;
                    if reply.has_tool_calls() {
                        State::Executing(reply)
                    } else {
                        let text = reply.content.clone();
                        if text.is_some() {
                            self.append(reply)?;
                        }
                        State::Done(text)
                    }
                }
                State::Executing(reply) => {
                    self.execute(reply, observer).await?;
                    State::Requesting
                }
                State::Done(reply) => {
                    tracing::debug!(iterations, "turn complete");
                    return Ok(TurnOutcome::Done { reply });
                }
                State::LimitReached => {
                    tracing::info!(iterations, "tool iteration limit reached");
                    self.append(Message::assistant(limit_notice(iterations)))?;
                    return Ok(TurnOutcome::LimitReached { iterations });
                }
            };
        }
    }

    async fn request(&self, observer: &mut impl TurnObserver) -> Result<Message> {
        let messages = self.context.build(&self.history).await?;
        let request = ModelRequest {
            messages: &messages,
            tools: self.tools.specs(),
            tool_choice: ToolChoice::Auto,
        };

        let mut on_delta = |delta: &str| observer.on_delta(delta);
        Ok(self.backend.complete(request, Some(&mut on_delta)).await?)
    }

    async fn execute(
        &mut self,
        mut reply: Message,
        observer: &mut impl TurnObserver,
    ) -> Result<()> {
        for call in reply.tool_calls.iter_mut().flatten() {
            if call.id.is_empty() {
                call.id = format!("call_{}", Uuid::new_v4());
            }
        }
        observer.on_tool_calls(reply.tool_calls());

        let mut invocations = Vec::with_capacity(reply.tool_calls().len());
        for call in reply.tool_calls() {
            let mut invocation = ToolInvocation::from_call(call);
            if call.function.arguments.trim().is_empty() {
                invocation.arguments = "{}".to_string();
            } else if let Err(e) = serde_json::from_str::<Value>(&call.function.arguments) {
                let failure = ArgumentParseFailure {
                    call_id: call.id.clone(),
                    tool: call.function.name.clone(),
                    error: e.to_string(),
                };
                tracing::warn!(
                    tool = %failure.tool,
                    call_id = %failure.call_id,
                    error = %failure.error,
                    "tool call arguments are not valid JSON"
                );
                observer.on_argument_error(&failure);
                invocation.arguments = String::new();
            }
            invocations.push(invocation);
        }

        let results = self.tools.execute_many(invocations).await;
        observer.on_tool_results(&results);

        self.append(reply)?;
        for result in &results {
            self.append(result.to_message())?;
        }
        Ok(())
    }

    fn append(&mut self, message: Message) -> Result<()> {
        self.store.append(&message)?;
        self.history.push(message);
        debug_assert!(
            validate_history(&self.history).is_ok(),
            "history invariant violated"
        );
        Ok(())
    }
}

fn limit_notice(iterations: usize) -> String {
    format!(
        "I stopped after {iterations} rounds of tool calls without reaching an answer. \
         Ask me to continue if you want me to keep going."
    )
}
