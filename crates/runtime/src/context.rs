//! Per-iteration context assembly.
//!
//! A [`ContextBuilder`] turns the conversation history into the exact
//! message list sent to the model. It runs before every completion request,
//! so workspace files edited by a tool are visible on the next iteration.

use crate::{Error, Result};
use crate::model::Message;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Default system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Workspace files injected as system messages, in order.
pub const WORKSPACE_FILES: &[&str] = &["AGENT.md", "SOUL.md", "USER.md", "MEMORY.md"];

const SKILLS_DIR: &str = "skills";
const SKILL_FILE: &str = "SKILL.md";

/// Builds the request context from the history.
pub trait ContextBuilder: Send + Sync {
    fn build(&self, history: &[Message]) -> impl Future<Output = Result<Vec<Message>>> + Send;
}

/// Fixed preamble followed by the history.
#[derive(Debug, Clone, Default)]
pub struct StaticContext {
    preamble: Vec<Message>,
}

impl StaticContext {
    pub fn new(preamble: Vec<Message>) -> Self {
        Self { preamble }
    }

    /// A single system prompt.
    pub fn system(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::system(prompt)])
    }
}

impl ContextBuilder for StaticContext {
    async fn build(&self, history: &[Message]) -> Result<Vec<Message>> {
        Ok(self.preamble.iter().chain(history).cloned().collect())
    }
}

/// System prompt plus the agent's workspace files and skills.
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    workspace: PathBuf,
    system_prompt: String,
}

impl WorkspaceContext {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Names of skill directories that contain a `SKILL.md`, sorted.
    pub async fn skills(&self) -> Vec<String> {
        let dir = self.workspace.join(SKILLS_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot read skills directory");
                return Vec::new();
            }
        };

        let mut skills = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        dir = %dir.display(),
                        error = %e,
                        "cannot read skills directory"
                    );
                    break;
                }
            };
            let path = entry.path();
            if tokio::fs::try_exists(path.join(SKILL_FILE)).await.unwrap_or(false) {
                skills.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        skills.sort();
        skills
    }

    async fn read_optional(&self, name: &str) -> Option<String> {
        let path = self.workspace.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if !content.trim().is_empty() => Some(content),
            Ok(_) => None,
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "skipping unreadable workspace file"
                );
                None
            }
        }
    }
}

impl ContextBuilder for WorkspaceContext {
    async fn build(&self, history: &[Message]) -> Result<Vec<Message>> {
        if !tokio::fs::metadata(&self.workspace).await.is_ok_and(|m| m.is_dir()) {
            return Err(Error::Context(format!(
                "workspace {} is not a directory",
                self.workspace.display()
            )));
        }
        let mut messages = vec![Message::system(&self.system_prompt)];

        for name in WORKSPACE_FILES {
            if let Some(content) = self.read_optional(name).await {
                messages.push(Message::system(content));
            }
        }

        let skills = self.skills().await;
        if !skills.is_empty() {
            let list: Vec<String> = skills.iter().map(|s| format!("- {s}")).collect();
            messages.push(Message::system(format!("# SKILLS\n{}", list.join("\n"))));
        }

        messages.extend(history.iter().cloned());
        Ok(messages)
    }
}
