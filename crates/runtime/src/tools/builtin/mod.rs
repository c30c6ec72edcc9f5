//! Built-in workspace tools.

mod command;
mod fs;

pub use command::{ExecuteCommand, ExecuteShellCommand};
pub use fs::{GetWorkspace, ListDir, ReadFile, WriteFile};

use super::{Tool, ToolError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Every built-in tool, in the order they are offered to the model.
pub fn all() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ReadFile),
        Arc::new(WriteFile),
        Arc::new(ListDir),
        Arc::new(GetWorkspace),
        Arc::new(ExecuteCommand),
        Arc::new(ExecuteShellCommand),
    ]
}

/// Deserialize a tool's arguments object.
fn parse_args<T: DeserializeOwned>(tool: &str, input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input)
        .map_err(|e| ToolError::InvalidInput(format!("{tool}: {e}")))
}
