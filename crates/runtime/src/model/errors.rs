use thiserror::Error;

/// Errors from a completion exchange.
///
/// Every variant is a transport failure: it aborts the current turn and is
/// surfaced to the caller without being retried.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModelError {
    /// The request could not be sent.
    #[error("network: {0}")]
    Network(String),

    /// The endpoint answered with a non-2xx status.
    #[error("request failed with status {status}: {}", .body.as_deref().unwrap_or("<empty body>"))]
    Api { status: u16, body: Option<String> },

    /// Reading the event stream failed before it finished.
    #[error("stream read: {0}")]
    Stream(String),

    /// The response body could not be interpreted.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}
