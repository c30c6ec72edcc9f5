use super::parse_args;
use crate::tools::{Tool, ToolContext, ToolError};
use async_trait::async_trait;
use policy::CapabilityRequest;
use serde::Deserialize;
use serde_json::{Value, json};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Bytes captured per output stream before the command is failed.
const DEFAULT_MAX_BUFFER: usize = 1024 * 1024;

const SHELL: &str = "sh";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandArgs {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    timeout_ms: Option<u64>,
    max_buffer: Option<usize>,
}

impl CommandArgs {
    fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShellArgs {
    command: String,
    timeout_ms: Option<u64>,
    max_buffer: Option<usize>,
}

/// Limits applied to one process run.
struct Limits {
    timeout_ms: u64,
    max_buffer: usize,
}

impl Limits {
    fn new(timeout_ms: Option<u64>, max_buffer: Option<usize>) -> Self {
        Self {
            timeout_ms: timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            max_buffer: max_buffer.unwrap_or(DEFAULT_MAX_BUFFER),
        }
    }
}

fn timeout_property() -> Value {
    json!({
        "type": "number",
        "description": "Timeout in milliseconds (default: 10000)"
    })
}

fn max_buffer_property() -> Value {
    json!({
        "type": "number",
        "description": "Max bytes of stdout or stderr to capture (default: 1048576)"
    })
}

/// Run a program inside the workspace without a shell.
pub struct ExecuteCommand;

#[async_trait]
impl Tool for ExecuteCommand {
    fn name(&self) -> &str {
        "executeCommand"
    }

    fn description(&self) -> &str {
        "Execute a system command in the workspace"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Program to execute"
                },
                "args": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Arguments for the program"
                },
                "timeoutMs": timeout_property(),
                "maxBuffer": max_buffer_property()
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: CommandArgs = parse_args(self.name(), input)?;
        if args.command.trim().is_empty() {
            return Err(ToolError::InvalidInput("command must not be empty".into()));
        }

        let command_line = args.command_line();
        ctx.require(&CapabilityRequest::exec(&command_line))?;
        ctx.require(&CapabilityRequest::read(ctx.workspace()))?;

        let mut command = Command::new(&args.command);
        command.args(&args.args);
        run(
            command,
            &command_line,
            ctx,
            Limits::new(args.timeout_ms, args.max_buffer),
        )
        .await
    }
}

/// Run a command line through `sh -c`, so pipes and redirections work.
///
/// The policy sees the request as `sh -c <command>`: an exec allow rule for
/// some other program does not cover shell lines.
pub struct ExecuteShellCommand;

#[async_trait]
impl Tool for ExecuteShellCommand {
    fn name(&self) -> &str {
        "executeSimpleCommand"
    }

    fn description(&self) -> &str {
        "Execute a simple command with shell features (pipes, redirections) in the workspace"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command to execute (can include pipes and redirections)"
                },
                "timeoutMs": timeout_property(),
                "maxBuffer": max_buffer_property()
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: ShellArgs = parse_args(self.name(), input)?;
        if args.command.trim().is_empty() {
            return Err(ToolError::InvalidInput("command must not be empty".into()));
        }

        let command_line = format!("{SHELL} -c {}", args.command);
        ctx.require(&CapabilityRequest::exec(&command_line))?;
        ctx.require(&CapabilityRequest::read(ctx.workspace()))?;

        let mut command = Command::new(SHELL);
        command.arg("-c").arg(&args.command);
        run(
            command,
            &command_line,
            ctx,
            Limits::new(args.timeout_ms, args.max_buffer),
        )
        .await
    }
}

async fn run(
    mut command: Command,
    command_line: &str,
    ctx: &ToolContext,
    limits: Limits,
) -> Result<Value, ToolError> {
    tracing::debug!(
        command = %command_line,
        timeout_ms = limits.timeout_ms,
        max_buffer = limits.max_buffer,
        "executing command"
    );

    let mut child = command
        .current_dir(ctx.workspace())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::Execution(format!("failed to start {command_line}: {e}")))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let finished = async {
        let (stdout, stderr) = tokio::try_join!(
            read_capped(stdout, limits.max_buffer, "stdout"),
            read_capped(stderr, limits.max_buffer, "stderr"),
        )?;
        let status = child
            .wait()
            .await
            .map_err(|e| ToolError::Execution(format!("failed to wait for {command_line}: {e}")))?;
        Ok::<_, ToolError>((status, stdout, stderr))
    };

    // Returning early drops `child`, which kills the process.
    let (status, stdout, stderr) =
        tokio::time::timeout(Duration::from_millis(limits.timeout_ms), finished)
            .await
            .map_err(|_| ToolError::Timeout(limits.timeout_ms))??;

    let stdout = String::from_utf8_lossy(&stdout).into_owned();
    let stderr = String::from_utf8_lossy(&stderr).into_owned();

    if !status.success() {
        let code = status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        return Err(ToolError::Execution(format!(
            "command failed with exit code {code}: {}",
            stderr.trim_end()
        )));
    }

    Ok(json!({
        "success": true,
        "output": {"stdout": stdout, "stderr": stderr}
    }))
}

/// Read a whole pipe, failing once it yields more than `limit` bytes.
async fn read_capped<R>(pipe: Option<R>, limit: usize, stream: &str) -> Result<Vec<u8>, ToolError>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    pipe.take(cap)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| ToolError::Execution(format!("failed to read {stream}: {e}")))?;
    if buf.len() > limit {
        return Err(ToolError::Execution(format!(
            "{stream} exceeded maxBuffer of {limit} bytes"
        )));
    }
    Ok(buf)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use policy::{CapabilityKind, Policy};

    fn context(dir: &std::path::Path) -> ToolContext {
        ToolContext::new(dir, Policy::permissive())
    }

    #[tokio::test]
    async fn runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();

        let out = ExecuteCommand
            .execute(json!({"command": "ls"}), &context(dir.path()))
            .await
            .unwrap();
        assert!(out["output"]["stdout"].as_str().unwrap().contains("marker.txt"));
    }

    #[tokio::test]
    async fn passes_arguments_without_shell() {
        let dir = tempfile::tempdir().unwrap();
        let out = ExecuteCommand
            .execute(
                json!({"command": "echo", "args": ["a b", "$HOME"]}),
                &context(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(out["output"]["stdout"], "a b $HOME\n");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExecuteCommand
            .execute(
                json!({"command": "ls", "args": ["does-not-exist"]}),
                &context(dir.path()),
            )
            .await
            .unwrap_err();
        let ToolError::Execution(message) = err else {
            panic!("expected execution error, got {err:?}");
        };
        assert!(message.contains("exit code"), "{message}");
        assert!(message.contains("does-not-exist"), "{message}");
    }

    #[tokio::test]
    async fn times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExecuteCommand
            .execute(
                json!({"command": "sleep", "args": ["5"], "timeoutMs": 100}),
                &context(dir.path()),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Timeout(100));
    }

    #[tokio::test]
    async fn output_past_max_buffer_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExecuteCommand
            .execute(
                json!({"command": "head", "args": ["-c", "4096", "/dev/zero"], "maxBuffer": 100}),
                &context(dir.path()),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::Execution("stdout exceeded maxBuffer of 100 bytes".into())
        );

        let out = ExecuteCommand
            .execute(
                json!({"command": "head", "args": ["-c", "100", "/dev/zero"], "maxBuffer": 100}),
                &context(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(out["output"]["stdout"].as_str().unwrap().len(), 100);
    }

    #[tokio::test]
    async fn exec_can_be_denied() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = Policy::permissive();
        policy.deny.kinds.insert(CapabilityKind::Exec);
        let ctx = ToolContext::new(dir.path(), policy);

        let err = ExecuteCommand
            .execute(json!({"command": "ls"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::CapabilityDenied(_)));

        let err = ExecuteShellCommand
            .execute(json!({"command": "ls"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::CapabilityDenied(_)));
    }

    #[tokio::test]
    async fn unknown_program_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExecuteCommand
            .execute(
                json!({"command": "definitely-not-a-real-binary"}),
                &context(dir.path()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }

    #[tokio::test]
    async fn shell_supports_pipes_and_redirection() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let out = ExecuteShellCommand
            .execute(json!({"command": "printf 'a\\nb\\nc\\n' | wc -l"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["output"]["stdout"].as_str().unwrap().trim(), "3");

        ExecuteShellCommand
            .execute(json!({"command": "echo saved > out.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "saved\n"
        );
    }

    #[tokio::test]
    async fn shell_failures_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let err = ExecuteShellCommand
            .execute(json!({"command": "echo oops >&2; exit 3"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::Execution("command failed with exit code 3: oops".into())
        );

        let err = ExecuteShellCommand
            .execute(json!({"command": "sleep 5", "timeoutMs": 100}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Timeout(100));

        let err = ExecuteShellCommand
            .execute(
                json!({"command": "head -c 5000 /dev/zero >&2", "maxBuffer": 1000}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::Execution("stderr exceeded maxBuffer of 1000 bytes".into())
        );
    }

    #[tokio::test]
    async fn program_allow_rule_does_not_cover_shell_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = Policy::permissive();
        policy.allow.exec = vec!["ls".to_string()];
        let ctx = ToolContext::new(dir.path(), policy);

        assert!(ExecuteCommand.execute(json!({"command": "ls"}), &ctx).await.is_ok());
        let err = ExecuteShellCommand
            .execute(json!({"command": "ls"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::CapabilityDenied(_)));
    }
}
