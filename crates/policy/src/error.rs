//! Policy error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The policy refused a capability.
    #[error("{request} denied: {reason}")]
    Denied { request: String, reason: String },

    #[error("invalid policy: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot read policy file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
