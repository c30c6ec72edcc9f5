use super::parse_args;
use crate::tools::{Tool, ToolContext, ToolError};
use async_trait::async_trait;
use policy::CapabilityRequest;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileArgs {
    file_path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteArgs {
    file_path: String,
    content: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct DirArgs {
    dir_path: Option<String>,
}

fn scope(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn io_error(action: &str, path: &str, err: std::io::Error) -> ToolError {
    ToolError::Execution(format!("failed to {action} {path}: {err}"))
}

/// Read a UTF-8 file from the workspace.
pub struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &str {
        "readFile"
    }

    fn description(&self) -> &str {
        "Read content from a file in the workspace"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {
                    "type": "string",
                    "description": "Path to the file to read (relative to workspace)"
                }
            },
            "required": ["filePath"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: FileArgs = parse_args(self.name(), input)?;
        let path = ctx.resolve(&args.file_path)?;
        ctx.require(&CapabilityRequest::read(&path))?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error("read", &args.file_path, e))?;
        Ok(json!({"success": true, "content": content}))
    }
}

/// Write a file in the workspace, creating parent directories.
pub struct WriteFile;

#[async_trait]
impl Tool for WriteFile {
    fn name(&self) -> &str {
        "writeFile"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {
                    "type": "string",
                    "description": "Path to the file to write (relative to workspace)"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["filePath", "content"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: WriteArgs = parse_args(self.name(), input)?;
        let path = ctx.resolve(&args.file_path)?;
        ctx.require(&CapabilityRequest::write(&path))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create parent of", &args.file_path, e))?;
        }
        tokio::fs::write(&path, args.content.as_bytes())
            .await
            .map_err(|e| io_error("write", &args.file_path, e))?;

        tracing::debug!(path = %path.display(), bytes = args.content.len(), "wrote file");
        Ok(json!({"success": true}))
    }
}

/// List the entries of a workspace directory.
pub struct ListDir;

#[async_trait]
impl Tool for ListDir {
    fn name(&self) -> &str {
        "listDir"
    }

    fn description(&self) -> &str {
        "List contents of a directory in the workspace"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dirPath": {
                    "type": "string",
                    "description": "Path to the directory to list (relative to workspace, defaults to the workspace root)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: DirArgs = parse_args(self.name(), input)?;
        let dir = args.dir_path.as_deref().unwrap_or(".");
        let path = ctx.resolve(dir)?;
        ctx.require(&CapabilityRequest::read(&path))?;

        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| io_error("list", dir, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("list", dir, e))?
        {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
        files.sort();

        Ok(json!({"success": true, "files": files}))
    }
}

/// Report the absolute workspace root.
pub struct GetWorkspace;

#[async_trait]
impl Tool for GetWorkspace {
    fn name(&self) -> &str {
        "getWorkspace"
    }

    fn description(&self) -> &str {
        "Get the current workspace path"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        Ok(json!({"success": true, "workspace": scope(ctx.workspace())}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy::{CapabilityKind, Policy};

    fn context(dir: &Path) -> ToolContext {
        ToolContext::new(dir, Policy::permissive())
    }

    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let written = WriteFile
            .execute(json!({"filePath": "notes/today.md", "content": "hello"}), &ctx)
            .await
            .unwrap();
        assert_eq!(written, json!({"success": true}));
        assert!(dir.path().join("notes").is_dir());

        let read = ReadFile
            .execute(json!({"filePath": "notes/today.md"}), &ctx)
            .await
            .unwrap();
        assert_eq!(read["content"], "hello");
    }

    #[tokio::test]
    async fn list_dir_is_sorted_and_defaults_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let ctx = context(dir.path());

        let listed = ListDir.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(listed["files"], json!(["a.txt", "b.txt", "sub"]));

        let listed = ListDir.execute(json!({"dirPath": "."}), &ctx).await.unwrap();
        assert_eq!(listed["files"], json!(["a.txt", "b.txt", "sub"]));
    }

    #[tokio::test]
    async fn paths_outside_workspace_are_denied() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let err = ReadFile
            .execute(json!({"filePath": "../../etc/passwd"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::CapabilityDenied(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn policy_denial_blocks_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = Policy::permissive();
        policy.deny.kinds.insert(CapabilityKind::FsWrite);
        let ctx = ToolContext::new(dir.path(), policy);

        let err = WriteFile
            .execute(json!({"filePath": "x.txt", "content": "x"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::CapabilityDenied(_)));
        assert!(!dir.path().join("x.txt").exists());
    }

    #[tokio::test]
    async fn missing_arguments_are_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFile
            .execute(json!({}), &context(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn missing_file_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFile
            .execute(json!({"filePath": "nope.md"}), &context(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }

    #[tokio::test]
    async fn get_workspace_reports_root() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let out = GetWorkspace.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(out["workspace"], scope(ctx.workspace()));
    }
}
