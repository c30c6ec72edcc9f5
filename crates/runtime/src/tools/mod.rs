//! Tool registry, dispatch, and built-in tools.

pub mod builtin;
mod context;
pub mod errors;
mod host;
mod registry;
pub mod types;

pub use context::ToolContext;
pub use errors::{RegistrationError, ToolError};
pub use host::{Tool, ToolHost};
pub use registry::ToolRegistry;
pub use types::{ToolInvocation, ToolOutcome, ToolResult};
