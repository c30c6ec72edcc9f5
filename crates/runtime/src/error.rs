use crate::history::HistoryError;
use crate::model::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The request context could not be assembled.
    #[error("cannot build context: {0}")]
    Context(String),

    /// The operation does not apply to the current history.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Storage(#[from] storage::Error),
}

impl Error {
    /// Whether the turn failed while talking to the completion endpoint.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Model(_))
    }
}

/// Result alias for turn operations.
pub type Result<T> = std::result::Result<T, Error>;
