//! Execution context shared by all tools.

use super::ToolError;
use policy::{CapabilityRequest, Policy};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Workspace root and policy handed to every tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    workspace: PathBuf,
    policy: Policy,
}

impl ToolContext {
    /// Create a context rooted at `workspace`. Relative roots are resolved
    /// against the current directory.
    pub fn new(workspace: impl AsRef<Path>, policy: Policy) -> Self {
        let workspace = workspace.as_ref();
        let absolute = std::path::absolute(workspace).unwrap_or_else(|_| workspace.to_path_buf());
        Self {
            workspace: normalize(&absolute),
            policy,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Resolve a workspace-relative path, rejecting anything that escapes
    /// the workspace.
    ///
    /// Symlinks in the part of the path that already exists are followed,
    /// so the returned path is the real target the policy gets to see.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ToolError> {
        let lexical = normalize(&self.workspace.join(relative));
        if !lexical.starts_with(&self.workspace) {
            return Err(ToolError::CapabilityDenied(format!(
                "path escapes workspace: {relative}"
            )));
        }
        let real = real_path(&lexical);
        if !real.starts_with(real_path(&self.workspace)) {
            return Err(ToolError::CapabilityDenied(format!(
                "path escapes workspace through a symlink: {relative}"
            )));
        }
        Ok(real)
    }

    /// Check a capability against the policy.
    pub fn require(&self, request: &CapabilityRequest) -> Result<(), ToolError> {
        self.policy.require(request).map_err(ToolError::from)
    }
}

/// Lexically normalize a path: drop `.` and fold `..` into its parent.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing prefix of `path` and re-attach the
/// components that do not exist yet.
fn real_path(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        if let Ok(real) = std::fs::canonicalize(existing) {
            return missing.iter().rev().fold(real, |acc, name| acc.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_inside_workspace() {
        let ctx = ToolContext::new("/work/space", Policy::default());
        assert_eq!(ctx.resolve(".").unwrap(), PathBuf::from("/work/space"));
        assert_eq!(
            ctx.resolve("notes/../todo.md").unwrap(),
            PathBuf::from("/work/space/todo.md")
        );
    }

    #[test]
    fn rejects_traversal() {
        let ctx = ToolContext::new("/work/space", Policy::default());
        assert!(matches!(
            ctx.resolve("../other/secret"),
            Err(ToolError::CapabilityDenied(_))
        ));
        assert!(ctx.resolve("/etc/passwd").is_err());
        // Sibling directory sharing a name prefix.
        assert!(ctx.resolve("../spaceship").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_followed_before_the_containment_check() {
        let workspace = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();
        std::fs::create_dir(workspace.path().join("real")).unwrap();
        std::os::unix::fs::symlink(outside.path(), workspace.path().join("escape")).unwrap();
        std::os::unix::fs::symlink(
            workspace.path().join("real"),
            workspace.path().join("alias"),
        )
        .unwrap();

        let ctx = ToolContext::new(workspace.path(), Policy::permissive());
        assert!(matches!(
            ctx.resolve("escape/secret.txt"),
            Err(ToolError::CapabilityDenied(_))
        ));
        assert!(ctx.resolve("escape/new.txt").is_err());

        let root = std::fs::canonicalize(workspace.path()).unwrap();
        assert_eq!(
            ctx.resolve("alias/new/file.md").unwrap(),
            root.join("real/new/file.md")
        );
    }

    #[test]
    fn policy_denial_maps_to_capability_denied() {
        let ctx = ToolContext::new("/work", Policy::restrictive());
        let err = ctx.require(&CapabilityRequest::exec("ls")).unwrap_err();
        assert!(matches!(err, ToolError::CapabilityDenied(_)));
    }
}
