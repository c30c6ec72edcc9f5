use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("capability denied: {0}")]
    CapabilityDenied(String),
    #[error("timeout after {0}ms")]
    Timeout(u64),
    #[error("execution failed: {0}")]
    Execution(String),
}

impl From<policy::Error> for ToolError {
    fn from(err: policy::Error) -> Self {
        match err {
            policy::Error::Denied { request, reason } => {
                Self::CapabilityDenied(format!("{request}: {reason}"))
            }
            other => Self::Execution(other.to_string()),
        }
    }
}

/// Errors rejecting a tool at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RegistrationError {
    #[error("invalid tool name {0:?}: use 1-64 letters, digits, '_' or '-'")]
    InvalidName(String),
    #[error("tool {0} has an empty description")]
    MissingDescription(String),
    #[error("tool {name} has an invalid parameter schema: {reason}")]
    InvalidSchema { name: String, reason: String },
    #[error("tool {0} is already registered")]
    Duplicate(String),
}
