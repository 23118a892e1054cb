//! Shell command execution, confined to the context's working directory.
//!
//! Commands only run when `workingdir` is set; that directory becomes the
//! process cwd.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{optional_str, required_str, search_root, Tool, ToolExecutionContext};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(windows)]
const DEFAULT_SHELL: &str = "cmd";
#[cfg(not(windows))]
const DEFAULT_SHELL: &str = "/bin/sh";

/// Make command output safe to hand to a model.
/// Mostly-binary output is summarized instead of echoed.
fn sanitize_output(bytes: &[u8]) -> String {
    let non_printable = bytes
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();

    if bytes.len() > 100 && non_printable > bytes.len() / 10 {
        return format!(
            "[Binary output detected - {} bytes, {}% non-printable]",
            bytes.len(),
            non_printable * 100 / bytes.len()
        );
    }

    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|&c| c == '\n' || c == '\r' || c == '\t' || (c >= ' ' && c != '\u{FFFD}'))
        .collect()
}

/// The flag that makes `shell` read a command string.
fn command_flag(shell: &str) -> &'static str {
    let program = shell.rsplit(['/', '\\']).next().unwrap_or(shell);
    match program.to_ascii_lowercase().as_str() {
        "cmd" | "cmd.exe" => "/C",
        "pwsh" | "pwsh.exe" | "powershell" | "powershell.exe" => "-Command",
        _ => "-c",
    }
}

/// Run a shell command in the working directory.
pub struct RunCommand;

#[async_trait]
impl Tool for RunCommand {
    fn name(&self) -> &str {
        "terminal.run_command"
    }

    fn description(&self) -> &str {
        "Run a command in the terminal. The working directory is set to the context's workingdir. Commands time out after 30 seconds."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute in the terminal"
                },
                "shell": {
                    "type": "string",
                    "description": format!("The shell to use (default: {})", DEFAULT_SHELL)
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> anyhow::Result<String> {
        let command = required_str(&args, "command")?;
        let shell = optional_str(&args, "shell").unwrap_or(DEFAULT_SHELL);

        let Some(workingdir) = ctx.working_dir() else {
            return Ok("Error: No working directory set in context. Cannot run terminal commands without a working directory restriction.".to_string());
        };
        let cwd = match search_root(ctx) {
            Ok(cwd) if cwd.is_dir() => cwd,
            _ => {
                return Ok(format!(
                    "Error: Working directory {} does not exist or is not a directory",
                    workingdir.display()
                ))
            }
        };

        tracing::info!("Running command in working directory [{}]: {}", cwd.display(), command);

        let child = Command::new(shell)
            .arg(command_flag(shell))
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(COMMAND_TIMEOUT, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(format!("Error: Shell '{}' not found", shell));
            }
            Ok(Err(e)) => return Ok(format!("Error running command: {}", e)),
            Err(_) => {
                tracing::warn!("Command timed out after {:?}", COMMAND_TIMEOUT);
                return Ok(format!(
                    "Error: Command timed out after {} seconds",
                    COMMAND_TIMEOUT.as_secs()
                ));
            }
        };

        let stdout = sanitize_output(&output.stdout);
        let stderr = sanitize_output(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        tracing::debug!(
            "Command completed: exit={}, stdout_len={}, stderr_len={}",
            exit_code,
            stdout.len(),
            stderr.len()
        );

        let mut result = stdout;
        if !stderr.is_empty() {
            result.push_str("\nSTDERR:\n");
            result.push_str(&stderr);
        }
        if !output.status.success() {
            result = format!("Command failed with return code {}\n{}", exit_code, result);
        }
        Ok(result)
    }
}
