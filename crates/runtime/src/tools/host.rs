//! Tool and tool host traits.

use super::{ToolContext, ToolError, ToolInvocation, ToolResult};
use crate::model::ToolSpec;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;

/// An invocable capability.
///
/// Implementations are checked once when registered; after that the
/// registry trusts `name`, `description`, and `parameters` as-is.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model calls the tool by.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Run the tool with parsed arguments.
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Trait for tool execution hosts.
///
/// This is the boundary between the turn loop and side effects.
pub trait ToolHost: Send + Sync {
    /// Definitions of every available tool.
    fn specs(&self) -> &[ToolSpec];

    /// Execute a batch concurrently. Results come back in input order, one
    /// per invocation; failures are reported in-band, never as an error.
    fn execute_many(
        &self,
        invocations: Vec<ToolInvocation>,
    ) -> impl Future<Output = Vec<ToolResult>> + Send;
}
