//! Completion endpoint clients.
//!
//! Each provider implements [`crate::model::Backend`] for its wire protocol.

mod openai;

pub use openai::{CompletionClient, CompletionClientBuilder};
