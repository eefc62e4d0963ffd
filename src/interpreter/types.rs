//! Interpreter Types
//!
//! Runtime state, results, limits, and the cancellation/deadline
//! context threaded through every suspension point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

use crate::ast::types::ScriptNode;
use crate::interpreter::errors::ShellError;

/// Result of executing a single node or script.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Structured error for non-zero outcomes, when one is known
    pub error: Option<ShellError>,
}

impl ExecResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failure(exit_code: i32, error: ShellError) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("{}\n", error),
            exit_code,
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Lifecycle of one script invocation.
///
/// `Cancelled` is kept distinct from `TimedOut` for observability even
/// though both surface as a `Timeout` error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Ready,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

/// Variable, array, and function bindings for one engine instance.
///
/// Nested scopes (function calls) inherit a snapshot of the parent's
/// bindings and do not write back.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub variables: HashMap<String, String>,
    pub arrays: HashMap<String, Vec<String>>,
    pub functions: HashMap<String, ScriptNode>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot for a nested scope; mutations inside it stay there.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn set_array(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.arrays.insert(name.into(), values);
    }

    /// Resolve a name: scalar first, then an array joined by spaces.
    pub fn lookup(&self, name: &str) -> Option<String> {
        if let Some(v) = self.variables.get(name) {
            return Some(v.clone());
        }
        self.arrays.get(name).map(|vals| vals.join(" "))
    }
}

/// Execution limits guarding against runaway scripts.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    /// Max iterations of any single loop
    pub max_loop_iterations: usize,
    /// Max nesting of command substitutions
    pub max_substitution_depth: usize,
    /// Max commands executed by one script invocation
    pub max_command_count: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_loop_iterations: 100_000,
            max_substitution_depth: 32,
            max_command_count: 100_000,
        }
    }
}

/// Cooperative cancellation signal shared across tasks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve when the token is cancelled.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }
}

/// Deadline/cancellation context supplied to an execution.
///
/// A cancellation that fires before a node even starts is reported the
/// same way as an expired deadline: as a `Timeout` error.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    pub deadline: Option<Instant>,
    pub cancel: CancelToken,
}

impl ExecContext {
    /// No deadline, cancellable only through the token.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancelToken::new(),
        }
    }

    /// True once the deadline passed or the token fired.
    pub fn expired(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        match self.deadline {
            Some(d) => Instant::now() >= d,
            None => false,
        }
    }

    /// Time left until the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The error every expired context reports.
    pub fn timeout_error(&self) -> ShellError {
        if self.cancel.is_cancelled() {
            ShellError::timeout("execution cancelled")
        } else {
            ShellError::timeout("execution deadline exceeded")
        }
    }

    /// The lifecycle state matching how the context expired.
    pub fn expired_state(&self) -> ExecState {
        if self.cancel.is_cancelled() {
            ExecState::Cancelled
        } else {
            ExecState::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_result_success() {
        assert!(ExecResult::ok().success());
        let failed = ExecResult::failure(1, ShellError::execution_failed("boom"));
        assert!(!failed.success());
        assert!(failed.error.is_some());
    }

    #[test]
    fn test_scope_snapshot_does_not_write_back() {
        let mut parent = Scope::new();
        parent.set("X", "1");
        let mut child = parent.snapshot();
        child.set("X", "2");
        child.set("Y", "3");
        assert_eq!(parent.lookup("X").as_deref(), Some("1"));
        assert_eq!(parent.lookup("Y"), None);
    }

    #[test]
    fn test_scope_array_lookup_joins() {
        let mut scope = Scope::new();
        scope.set_array("xs", vec!["a".into(), "b".into()]);
        assert_eq!(scope.lookup("xs").as_deref(), Some("a b"));
    }

    #[test]
    fn test_cancel_token_reports_expired() {
        let ctx = ExecContext::unbounded();
        assert!(!ctx.expired());
        ctx.cancel.cancel();
        assert!(ctx.expired());
        assert!(ctx.timeout_error().is_timeout());
        assert_eq!(ctx.expired_state(), ExecState::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deadline_expires() {
        let ctx = ExecContext::with_timeout(Duration::from_millis(10));
        assert!(!ctx.expired());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ctx.expired());
        assert_eq!(ctx.expired_state(), ExecState::TimedOut);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_future_resolves() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel();
        assert!(handle.await.unwrap());
    }
}
