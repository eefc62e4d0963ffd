//! Pipeline Execution
//!
//! Bookkeeping for command pipelines (cmd1 | cmd2 | cmd3). A failure
//! partway through does not discard earlier output: the result keeps
//! every sub-result collected so far, reports `success = false`, and
//! carries the failing command's error.

use crate::interpreter::errors::ShellError;
use crate::interpreter::types::ExecResult;

/// Result of executing a pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    /// Per-command results in pipeline order, including the one that
    /// failed (when one did)
    pub sub_results: Vec<ExecResult>,
    pub success: bool,
    pub error: Option<ShellError>,
}

impl PipelineResult {
    pub fn new() -> Self {
        Self {
            sub_results: Vec::new(),
            success: true,
            error: None,
        }
    }

    /// Record one command's result; returns false when the pipeline
    /// should stop (the command failed).
    pub fn record(&mut self, result: ExecResult) -> bool {
        let ok = result.success();
        if !ok {
            self.success = false;
            self.error = result.error.clone().or_else(|| {
                Some(ShellError::execution_failed(format!(
                    "pipeline command exited with status {}",
                    result.exit_code
                )))
            });
        }
        self.sub_results.push(result);
        ok
    }

    /// Stdin for the next pipeline stage: the previous stage's stdout.
    pub fn next_stdin(&self) -> String {
        self.sub_results
            .last()
            .map(|r| r.stdout.clone())
            .unwrap_or_default()
    }

    /// Collapse into one result. Stdout comes from the final stage
    /// that ran; stderr accumulates across all stages.
    pub fn to_exec_result(&self) -> ExecResult {
        let stdout = self
            .sub_results
            .last()
            .map(|r| r.stdout.clone())
            .unwrap_or_default();
        let stderr: String = self
            .sub_results
            .iter()
            .map(|r| r.stderr.as_str())
            .collect();
        let exit_code = self
            .sub_results
            .last()
            .map(|r| r.exit_code)
            .unwrap_or(0);
        ExecResult {
            stdout,
            stderr,
            exit_code,
            error: self.error.clone(),
        }
    }
}
