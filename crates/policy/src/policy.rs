//! Capability rules and their evaluation.

use crate::{CapabilityKind, CapabilityRequest, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// System locations that stay off limits unless the deny list is replaced.
const SYSTEM_PREFIXES: &[&str] = &["/etc", "/var", "/usr", "/proc", "/sys", "/boot", "/dev"];

/// Rules consulted before every tool side effect.
///
/// Denials win over allow rules. With no `[allow]` table every path and
/// command is allowed, subject to `[deny]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub allow: AllowRules,

    #[serde(default)]
    pub deny: DenyRules,
}

/// Patterns a request must match to be granted.
///
/// Path patterns are `*` (anything), `dir/**` (anything under `dir`),
/// `dir/*` (direct children of `dir`), or a plain path prefix. Command
/// patterns are `*`, or a program name matching itself and anything it is
/// invoked with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowRules {
    pub read: Vec<String>,
    pub write: Vec<String>,
    pub exec: Vec<String>,
}

impl Default for AllowRules {
    fn default() -> Self {
        let any = || vec!["*".to_string()];
        Self {
            read: any(),
            write: any(),
            exec: any(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DenyRules {
    /// Kinds refused outright.
    pub kinds: HashSet<CapabilityKind>,

    /// Directories no read or write may reach into.
    pub paths: Vec<PathBuf>,
}

impl Default for DenyRules {
    fn default() -> Self {
        Self {
            kinds: HashSet::new(),
            paths: SYSTEM_PREFIXES.iter().map(PathBuf::from).collect(),
        }
    }
}

/// Outcome of [`Policy::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        *self == Decision::Allow
    }
}

impl Policy {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Defaults with process execution switched off.
    pub fn restrictive() -> Self {
        let mut policy = Self::default();
        policy.deny.kinds.insert(CapabilityKind::Exec);
        policy
    }

    /// Allows everything; only kinds added to `deny.kinds` are refused.
    pub fn permissive() -> Self {
        Self {
            allow: AllowRules::default(),
            deny: DenyRules {
                kinds: HashSet::new(),
                paths: Vec::new(),
            },
        }
    }

    pub fn check(&self, request: &CapabilityRequest) -> Decision {
        let kind = request.kind();
        if self.deny.kinds.contains(&kind) {
            return Decision::Deny(format!("{kind} is disabled"));
        }

        match request {
            CapabilityRequest::Read(path) | CapabilityRequest::Write(path) => {
                if let Some(prefix) = self.deny.paths.iter().find(|p| path.starts_with(p)) {
                    return Decision::Deny(format!("{} is off limits", prefix.display()));
                }
                let patterns = match request {
                    CapabilityRequest::Read(_) => &self.allow.read,
                    _ => &self.allow.write,
                };
                if patterns.iter().any(|p| path_matches(p, path)) {
                    Decision::Allow
                } else {
                    Decision::Deny(format!("no {kind} rule covers {}", path.display()))
                }
            }
            CapabilityRequest::Exec(line) => {
                if self.allow.exec.iter().any(|p| command_matches(p, line)) {
                    Decision::Allow
                } else {
                    Decision::Deny("command is not in the exec allow list".to_string())
                }
            }
        }
    }

    /// [`check`](Self::check), with a denial as an error.
    pub fn require(&self, request: &CapabilityRequest) -> Result<()> {
        match self.check(request) {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(Error::Denied {
                request: request.to_string(),
                reason,
            }),
        }
    }
}

fn path_matches(pattern: &str, path: &Path) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(dir) = pattern.strip_suffix("/**") {
        return path.starts_with(dir);
    }
    if let Some(dir) = pattern.strip_suffix("/*") {
        return path.parent() == Some(Path::new(dir));
    }
    path.starts_with(pattern)
}

fn command_matches(pattern: &str, line: &str) -> bool {
    pattern == "*"
        || line
            .strip_prefix(pattern)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}
