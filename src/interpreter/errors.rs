//! Execution Errors
//!
//! The structured error model shared by the engine and the
//! performance layer. Every error carries a kind, a human-readable
//! message, an optional wrapped cause, and free-form key/value context
//! for diagnostics. Kind, message, and context round-trip through the
//! metrics/report snapshots without loss.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::parser::types::ParseException;
use crate::sandbox::types::SecurityViolation;

/// Error classification, stable across serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Parse,
    SecurityViolation,
    CommandNotFound,
    ExecutionFailed,
    Timeout,
    FileNotFound,
    PermissionDenied,
    InvalidInput,
    ResourceExhausted,
    NetworkError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "parse_error",
            Self::SecurityViolation => "security_violation",
            Self::CommandNotFound => "command_not_found",
            Self::ExecutionFailed => "execution_failed",
            Self::Timeout => "timeout",
            Self::FileNotFound => "file_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidInput => "invalid_input",
            Self::ResourceExhausted => "resource_exhausted",
            Self::NetworkError => "network_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured shell error.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub struct ShellError {
    pub kind: ErrorKind,
    pub message: String,
    /// Wrapped cause, when this error was produced by another
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cause: Option<Box<ShellError>>,
    /// Free-form diagnostic context, e.g. {"command": "rm"}
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {})", cause)?;
        }
        Ok(())
    }
}

impl ShellError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            context: HashMap::new(),
        }
    }

    pub fn with_cause(mut self, cause: ShellError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Deadline or cancellation during execution. Caller-initiated
    /// cancellation reports the same kind as a deadline; see the
    /// lifecycle state for the distinction.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn command_not_found(command: &str) -> Self {
        Self::new(ErrorKind::CommandNotFound, format!("command not found: {}", command))
            .with_context("command", command)
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutionFailed, message)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

impl From<ParseException> for ShellError {
    fn from(e: ParseException) -> Self {
        Self::new(ErrorKind::Parse, e.to_string())
            .with_context("line", e.line.to_string())
            .with_context("column", e.column.to_string())
    }
}

impl From<SecurityViolation> for ShellError {
    fn from(v: SecurityViolation) -> Self {
        Self::new(ErrorKind::SecurityViolation, v.to_string())
            .with_context("command", &v.command)
            .with_context("rule", v.rule.as_str())
    }
}

/// Map a process-spawn IO error onto the shell error model.
pub fn from_spawn_error(command: &str, e: &std::io::Error) -> ShellError {
    match e.kind() {
        std::io::ErrorKind::NotFound => ShellError::command_not_found(command),
        std::io::ErrorKind::PermissionDenied => {
            ShellError::new(ErrorKind::PermissionDenied, format!("permission denied: {}", command))
                .with_context("command", command)
        }
        _ => ShellError::execution_failed(format!("failed to launch {}: {}", command, e))
            .with_context("command", command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_cause() {
        let err = ShellError::execution_failed("exit status 2")
            .with_cause(ShellError::command_not_found("frob"));
        let text = err.to_string();
        assert!(text.contains("execution_failed"));
        assert!(text.contains("command_not_found"));
    }

    #[test]
    fn test_context_round_trips_through_serde() {
        let err = ShellError::new(ErrorKind::SecurityViolation, "rejected")
            .with_context("command", "rm");
        let json = serde_json::to_string(&err).unwrap();
        let back: ShellError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, ErrorKind::SecurityViolation);
        assert_eq!(back.message, "rejected");
        assert_eq!(back.context.get("command").map(String::as_str), Some("rm"));
    }

    #[test]
    fn test_is_timeout() {
        assert!(ShellError::timeout("deadline exceeded").is_timeout());
        assert!(!ShellError::command_not_found("x").is_timeout());
    }

    #[test]
    fn test_from_parse_exception_carries_location() {
        let e = ParseException::new("bad token", 3, 9);
        let err: ShellError = e.into();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.context.get("line").map(String::as_str), Some("3"));
    }
}
