//! Capability checks for tool side effects.
//!
//! Built-in tools read files, write files and spawn processes only after
//! [`Policy::require`] grants the matching [`CapabilityRequest`].

mod capability;
mod error;
mod policy;

pub use capability::{CapabilityKind, CapabilityRequest};
pub use error::{Error, Result};
pub use policy::{AllowRules, Decision, DenyRules, Policy};
