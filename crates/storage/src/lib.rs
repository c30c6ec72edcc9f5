//! Append-only JSON-lines storage for roxy sessions.
//!
//! Every session is one file holding one JSON object per line. Records are
//! only ever appended; nothing is rewritten in place except by an explicit
//! [`SessionLog::clear`].
//!
//! # Overview
//!
//! - [`SessionStore`] owns a directory of session files: it creates,
//!   deletes and lists them.
//! - [`SessionLog`] is the handle for a single session: it appends records
//!   and loads them back in order.
//! - [`SessionKey`] maps a free-form session name (`cli:default`) to a safe
//!   file name (`cli_default.jsonl`).
//!
//! Records are generic: anything `Serialize` can be appended and anything
//! `DeserializeOwned` can be loaded back.
//!
//! # Example
//!
//! ```no_run
//! use storage::SessionStore;
//!
//! let store = SessionStore::open("/tmp/sessions")?;
//! let log = store.log("cli:default");
//! log.append(&serde_json::json!({"role": "user", "content": "hi"}))?;
//!
//! let records: Vec<serde_json::Value> = log.load()?;
//! assert_eq!(records.len(), 1);
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod store;

pub use error::{Error, Result};
pub use store::{SessionKey, SessionLog, SessionStore, SessionSummary};
