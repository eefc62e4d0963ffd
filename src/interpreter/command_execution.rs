//! External Command Execution
//!
//! The `CommandExecutor` seam the runtime implements, and the default
//! implementation that spawns real processes. Timeout or cancellation
//! interrupts the child (it is killed, not merely abandoned), and pipe
//! handles are released on every exit path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::interpreter::errors::{from_spawn_error, ShellError};
use crate::interpreter::types::{ExecContext, ExecResult};

/// One fully-expanded external invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandInvocation {
    pub name: String,
    pub args: Vec<String>,
    /// Piped or heredoc stdin; empty means no input
    pub stdin: String,
    /// Environment handed to the child
    pub env: HashMap<String, String>,
}

impl CommandInvocation {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            ..Self::default()
        }
    }
}

/// Command execution interface.
///
/// Implemented by the runtime; tests substitute their own to avoid
/// spawning processes.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        invocation: &CommandInvocation,
        ctx: &ExecContext,
    ) -> Result<ExecResult, ShellError>;
}

/// Default executor: spawns the named program as a child process and
/// captures stdout/stderr.
#[derive(Debug, Default)]
pub struct SystemExecutor;

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn execute(
        &self,
        invocation: &CommandInvocation,
        ctx: &ExecContext,
    ) -> Result<ExecResult, ShellError> {
        if ctx.expired() {
            return Err(ctx.timeout_error());
        }

        let mut command = Command::new(&invocation.name);
        command
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the handle must never leak a running child
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| from_spawn_error(&invocation.name, &e))?;

        // Feed stdin, then close it so the child sees EOF.
        if let Some(mut stdin) = child.stdin.take() {
            if !invocation.stdin.is_empty() {
                let _ = stdin.write_all(invocation.stdin.as_bytes()).await;
            }
            drop(stdin);
        }

        // Drain stdout/stderr concurrently with the wait; a child that
        // fills its pipe buffer would otherwise deadlock.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let deadline = async {
            match ctx.remaining() {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };

        let status = tokio::select! {
            status = child.wait() => status,
            _ = deadline => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ctx.timeout_error());
            }
            _ = ctx.cancel.cancelled() => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ctx.timeout_error());
            }
        };

        let status = status
            .map_err(|e| ShellError::execution_failed(format!("wait failed: {}", e)))?;
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let exit_code = status.code().unwrap_or(-1);

        let error = if exit_code == 0 {
            None
        } else {
            Some(
                ShellError::execution_failed(format!(
                    "{} exited with status {}",
                    invocation.name, exit_code
                ))
                .with_context("command", &invocation.name),
            )
        };

        Ok(ExecResult {
            stdout,
            stderr,
            exit_code,
            error,
        })
    }
}
