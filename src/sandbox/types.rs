//! Sandbox Types
//!
//! Violation and report types produced by the security policy gate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which rule family rejected a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationRule {
    DangerousCommand,
    NetworkTool,
    SensitivePath,
    RecursiveRootDelete,
    PasswordInArguments,
    ShellInjection,
}

impl ViolationRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DangerousCommand => "dangerous_command",
            Self::NetworkTool => "network_tool",
            Self::SensitivePath => "sensitive_path",
            Self::RecursiveRootDelete => "recursive_root_delete",
            Self::PasswordInArguments => "password_in_arguments",
            Self::ShellInjection => "shell_injection",
        }
    }
}

/// Raised when the sandbox rejects a command. Always fatal to the
/// node that triggered it; never retried.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("security violation ({}): {message}", .rule.as_str())]
pub struct SecurityViolation {
    pub rule: ViolationRule,
    pub message: String,
    /// The command name that was rejected
    pub command: String,
}

impl SecurityViolation {
    pub fn new(rule: ViolationRule, message: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
            command: command.into(),
        }
    }
}

/// Non-raising diagnostic summary of how a command fares against the
/// current rule sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityReport {
    pub dangerous: bool,
    pub network_tool: bool,
    pub matched_sensitive_paths: Vec<String>,
}

/// Seed data for the rule sets, supplied by the embedding layer.
/// Entries extend the defaults; they do not replace them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub dangerous_commands: Vec<String>,
    #[serde(default)]
    pub network_tools: Vec<String>,
    #[serde(default)]
    pub sensitive_paths: Vec<String>,
    #[serde(default)]
    pub trusted_commands: Vec<String>,
}
