//! Shell Tool
//!
//! `run_command`: executes a shell command inside the workspace with a
//! destructive-command blocklist, a wall-clock timeout, and a cap on
//! buffered output. Blocked commands fail without a child ever being
//! spawned; a timed-out child is killed.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::registry::ToolHandler;
use crate::tools::resolve_workspace_path;
use crate::types::{
    ErrorCode, ExecutionContext, ParamType, ToolDefinition, ToolParameter, ToolResult,
};

/// Default wall-clock cap in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Per-stream buffered output cap.
pub const OUTPUT_CAP_BYTES: usize = 16 * 1024 * 1024;

/// Command prefixes that never execute. Matched against the full command
/// line by first token, or by exact prefix followed by a space.
const BLOCKED_PREFIXES: &[&str] = &[
    "rm -r",
    "rm -f",
    "rm -rf",
    "rm -fr",
    "sudo",
    "su",
    "doas",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    "mkfs",
    "fdisk",
    "parted",
    "dd",
    "format",
    "chown -R",
    "curl",
    "wget",
    ":(){",
];

/// Whether a command line matches the blocklist.
pub fn is_blocked(command_line: &str) -> Option<&'static str> {
    let trimmed = command_line.trim();
    let first_token = trimmed.split_whitespace().next().unwrap_or("");
    for prefix in BLOCKED_PREFIXES {
        if prefix.contains(' ') {
            if trimmed == *prefix || trimmed.starts_with(&format!("{} ", prefix)) {
                return Some(prefix);
            }
        } else if first_token == *prefix {
            return Some(prefix);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tool
// ---------------------------------------------------------------------------

pub fn run_command_definition() -> ToolDefinition {
    ToolDefinition {
        name: "run_command".into(),
        description: "Run a shell command in the workspace and return its stdout.".into(),
        parameters: vec![
            ToolParameter::required("command", ParamType::String, "Command line to execute"),
            ToolParameter::optional("args", ParamType::Array, "Additional arguments", None),
            ToolParameter::optional(
                "cwd",
                ParamType::String,
                "Working directory, relative to the workspace root",
                None,
            ),
            ToolParameter::optional(
                "timeout",
                ParamType::Number,
                "Wall-clock limit in seconds",
                Some(Value::Number(DEFAULT_TIMEOUT_SECS.into())),
            ),
        ],
        safe: false,
    }
}

pub struct RunCommandTool;

#[async_trait]
impl ToolHandler for RunCommandTool {
    async fn execute(
        &self,
        params: &serde_json::Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> ToolResult {
        let command = params
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if command.is_empty() {
            return ToolResult::fail(ErrorCode::InvalidArguments, "command must be non-empty");
        }

        let mut command_line = command;
        if let Some(args) = params.get("args").and_then(|v| v.as_array()) {
            for arg in args {
                let piece = match arg {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                command_line.push(' ');
                command_line.push_str(&piece);
            }
        }

        if let Some(prefix) = is_blocked(&command_line) {
            warn!(command = %command_line, prefix, "blocked destructive command");
            return ToolResult::fail(
                ErrorCode::Blocked,
                format!("'{}' matches the destructive-command blocklist", prefix),
            );
        }

        let cwd = match params.get("cwd").and_then(|v| v.as_str()) {
            Some(raw) => match resolve_workspace_path(raw, &ctx.workspace_root) {
                Ok(p) => p,
                Err(e) => return e,
            },
            None => ctx.workspace_root.clone(),
        };

        let timeout_secs = params
            .get("timeout")
            .and_then(|v| v.as_u64())
            .filter(|&t| t > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        debug!(command = %command_line, cwd = %cwd.display(), timeout_secs, "run_command");

        let mut child = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command_line)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::fail(ErrorCode::FsFault, format!("failed to spawn: {}", e))
            }
        };

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let run = async {
            // Drain both pipes while waiting so the child never stalls on
            // a full pipe buffer.
            let (stdout, stderr, status) = tokio::join!(
                read_capped(stdout_pipe),
                read_capped(stderr_pipe),
                child.wait(),
            );
            (stdout, stderr, status)
        };

        match tokio::time::timeout(Duration::from_secs(timeout_secs), run).await {
            Ok((stdout, stderr, status)) => {
                let exit_code = match status {
                    Ok(s) => s.code().unwrap_or(-1),
                    Err(e) => {
                        return ToolResult::fail(
                            ErrorCode::FsFault,
                            format!("failed to await child: {}", e),
                        )
                    }
                };
                // A non-zero exit is still a completed execution; the
                // model reads the exit code from the metadata.
                ToolResult::ok(stdout)
                    .with_meta("exitCode", Value::Number(exit_code.into()))
                    .with_meta("stderr", Value::String(stderr))
                    .with_meta("timedOut", Value::Bool(false))
            }
            Err(_) => {
                let _ = child.kill().await;
                warn!(command = %command_line, timeout_secs, "command timed out");
                ToolResult::fail(
                    ErrorCode::Timeout,
                    format!("command exceeded {} s wall-clock limit", timeout_secs),
                )
                .with_meta("timedOut", Value::Bool(true))
            }
        }
    }
}

/// Read a child pipe to completion, keeping at most [`OUTPUT_CAP_BYTES`].
async fn read_capped<R>(pipe: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut collected: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if collected.len() < OUTPUT_CAP_BYTES {
                    let take = n.min(OUTPUT_CAP_BYTES - collected.len());
                    collected.extend_from_slice(&buf[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    let mut out = String::from_utf8_lossy(&collected).to_string();
    if truncated {
        out.push_str("\n[output truncated]");
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SafetyMode;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> ExecutionContext {
        ExecutionContext::new(dir.path().to_path_buf(), SafetyMode::AutoApply)
    }

    fn params(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn blocklist_matches_prefixes_and_tokens() {
        assert!(is_blocked("rm -rf /").is_some());
        assert!(is_blocked("rm -r build").is_some());
        assert!(is_blocked("sudo apt install x").is_some());
        assert!(is_blocked("dd if=/dev/zero of=/dev/sda").is_some());
        assert!(is_blocked("shutdown -h now").is_some());
        assert!(is_blocked("curl https://example.com").is_some());

        assert!(is_blocked("cargo check").is_none());
        assert!(is_blocked("ls -la").is_none());
        // `rm` without recursive/force flags is allowed
        assert!(is_blocked("rm stale.txt").is_none());
        // substring hits inside other words do not match
        assert!(is_blocked("echo formatting").is_none());
        assert!(is_blocked("ddgr search").is_none());
    }

    #[tokio::test]
    async fn blocked_command_never_spawns() {
        let dir = TempDir::new().unwrap();
        let canary = dir.path().join("canary");
        let cmd = format!("rm -rf / ; touch {}", canary.display());

        let result = RunCommandTool
            .execute(&params(&[("command", Value::String(cmd))]), &ctx(&dir))
            .await;

        assert_eq!(result.error_code(), Some("blocked"));
        assert!(!canary.exists());
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let result = RunCommandTool
            .execute(
                &params(&[("command", Value::String("echo hello".into()))]),
                &ctx(&dir),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("hello\n"));
        let meta = result.metadata.unwrap();
        assert_eq!(meta["exitCode"], Value::Number(0.into()));
        assert_eq!(meta["timedOut"], Value::Bool(false));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_in_metadata() {
        let dir = TempDir::new().unwrap();
        let result = RunCommandTool
            .execute(
                &params(&[("command", Value::String("exit 3".into()))]),
                &ctx(&dir),
            )
            .await;
        assert!(result.success);
        assert_eq!(
            result.metadata.unwrap()["exitCode"],
            Value::Number(3.into())
        );
    }

    #[tokio::test]
    async fn stderr_is_captured_separately() {
        let dir = TempDir::new().unwrap();
        let result = RunCommandTool
            .execute(
                &params(&[("command", Value::String("echo oops 1>&2".into()))]),
                &ctx(&dir),
            )
            .await;
        assert_eq!(result.output.as_deref(), Some(""));
        assert_eq!(
            result.metadata.unwrap()["stderr"],
            Value::String("oops\n".into())
        );
    }

    #[tokio::test]
    async fn runs_in_workspace_by_default() {
        let dir = TempDir::new().unwrap();
        let result = RunCommandTool
            .execute(&params(&[("command", Value::String("pwd".into()))]), &ctx(&dir))
            .await;
        let out = result.output.unwrap();
        assert!(out.trim().ends_with(
            dir.path().file_name().unwrap().to_str().unwrap()
        ));
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let dir = TempDir::new().unwrap();
        let result = RunCommandTool
            .execute(
                &params(&[
                    ("command", Value::String("sleep 30".into())),
                    ("timeout", Value::Number(1.into())),
                ]),
                &ctx(&dir),
            )
            .await;

        assert_eq!(result.error_code(), Some("timeout"));
        assert_eq!(
            result.metadata.unwrap()["timedOut"],
            Value::Bool(true)
        );
    }

    #[tokio::test]
    async fn cwd_outside_workspace_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = RunCommandTool
            .execute(
                &params(&[
                    ("command", Value::String("pwd".into())),
                    ("cwd", Value::String("../..".into())),
                ]),
                &ctx(&dir),
            )
            .await;
        assert_eq!(result.error_code(), Some("path-violation"));
    }
}
