//! Conversation types and the completion backend trait.

pub mod errors;
pub mod types;

pub use errors::ModelError;
pub use types::{
    Backend, CallKind, DeltaSink, FunctionCall, Message, ModelRequest, Role, ToolCall, ToolChoice,
    ToolSpec,
};
