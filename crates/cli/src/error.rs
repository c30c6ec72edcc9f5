//! Errors surfaced by the `roxy` binary.

use crate::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("no session named '{name}'. Run 'roxy sessions' to list them")]
    SessionNotFound { name: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unreadable or malformed `policy_file`.
    #[error(transparent)]
    Policy(#[from] policy::Error),

    /// A turn failed in a way the chat loop cannot recover from.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// Session files could not be read or written.
    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Registration(#[from] runtime::RegistrationError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
