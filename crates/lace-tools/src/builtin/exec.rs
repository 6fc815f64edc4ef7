//! The built-in shell tool. Runs a single command to completion under a
//! hard timeout; no background sessions or process management — spec.md's
//! tool model is one call in, one result out (§4.4), unlike the teacher's
//! exec/process pair which could detach a command into a long-lived
//! session.

use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use lace_types::tool::{ToolAnnotations, ToolDefinition};

use crate::tool::Tool;

/// Environment variables an exec call is never allowed to override, since
/// doing so could hijack how the child process (or anything it spawns)
/// resolves libraries and interpreters.
const BLOCKED_ENV_VARS: &[&str] = &["LD_PRELOAD", "LD_LIBRARY_PATH", "PATH", "PYTHONPATH", "DYLD_INSERT_LIBRARIES"];

fn is_blocked_env_var(name: &str) -> bool {
    BLOCKED_ENV_VARS.iter().any(|blocked| blocked.eq_ignore_ascii_case(name))
}

pub struct ExecTool {
    pub workdir: std::path::PathBuf,
    pub timeout: Duration,
}

impl ExecTool {
    pub fn new(workdir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[async_trait::async_trait]
impl Tool for ExecTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "exec".into(),
            description: "Run a shell command and return its combined stdout/stderr.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "the command to run" },
                    "env": {
                        "type": "object",
                        "additionalProperties": { "type": "string" },
                        "description": "extra environment variables for the child process"
                    }
                },
                "required": ["command"]
            }),
            annotations: ToolAnnotations {
                read_only_hint: Some(false),
                destructive_hint: Some(true),
                idempotent_hint: Some(false),
            },
        }
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<String, String> {
        let command = arguments
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing required field 'command'".to_string())?;

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(env) = arguments.get("env").and_then(Value::as_object) {
            for (key, value) in env {
                if is_blocked_env_var(key) {
                    return Err(format!("env var '{key}' may not be overridden"));
                }
                if let Some(value) = value.as_str() {
                    cmd.env(key, value);
                }
            }
        }

        let mut child = cmd.spawn().map_err(|e| format!("failed to spawn command: {e}"))?;

        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let run = async {
            let mut out = String::new();
            let mut err = String::new();
            let (_, _, status) = tokio::join!(
                stdout.read_to_string(&mut out),
                stderr.read_to_string(&mut err),
                child.wait(),
            );
            status.map(|status| (out, err, status))
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok((out, err, status))) => {
                let mut combined = out;
                if !err.is_empty() {
                    if !combined.is_empty() {
                        combined.push('\n');
                    }
                    combined.push_str(&err);
                }
                if status.success() {
                    Ok(combined)
                } else {
                    Err(format!(
                        "command exited with status {}: {combined}",
                        status.code().unwrap_or(-1)
                    ))
                }
            }
            Ok(Err(e)) => Err(format!("command wait failed: {e}")),
            Err(_elapsed) => {
                let _ = child.start_kill();
                Err("command timed out".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_stdout() {
        let tool = ExecTool::new(std::env::temp_dir());
        let mut args = Map::new();
        args.insert("command".into(), json!("echo hello"));
        let out = tool.call(args).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let tool = ExecTool::new(std::env::temp_dir());
        let mut args = Map::new();
        args.insert("command".into(), json!("exit 3"));
        assert!(tool.call(args).await.is_err());
    }

    #[tokio::test]
    async fn blocked_env_var_is_rejected() {
        let tool = ExecTool::new(std::env::temp_dir());
        let mut args = Map::new();
        args.insert("command".into(), json!("echo hi"));
        args.insert("env".into(), json!({"LD_PRELOAD": "/tmp/evil.so"}));
        let err = tool.call(args).await.unwrap_err();
        assert!(err.contains("LD_PRELOAD"));
    }

    #[tokio::test]
    async fn missing_command_is_rejected() {
        let tool = ExecTool::new(std::env::temp_dir());
        assert!(tool.call(Map::new()).await.is_err());
    }
}
